/*!
Shared-memory frame references.

The backend may publish large planes by writing them into a named POSIX
shared-memory segment and sending only `{name, shape, dtype}`. On Linux those
segments live as files under `/dev/shm`. A segment is attached, copied into an
owned buffer and detached inside a single call; the mapping never outlives it.
*/

use crate::error::Result;
use crate::frame::{Dtype, FrameData};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location of named shared-memory segments
pub const DEFAULT_SHM_ROOT: &str = "/dev/shm";

/// Reference to a frame plane held in shared memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShmRef {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: String,
}

/// Read-only attachment to a named segment; dropping it detaches
pub struct SharedSegment {
    path: PathBuf,
    mmap: Mmap,
}

impl SharedSegment {
    /// Attach to `name` under `root`; a leading `/` in the name is ignored
    pub fn attach(root: &Path, name: &str) -> io::Result<Self> {
        let path = root.join(name.trim_start_matches('/'));
        let file = File::open(&path)?;

        // SAFETY: the mapping is read-only and dropped before this call's owner
        // returns; the backend may unlink the segment but cannot shrink it while
        // mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self { path, mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }
}

impl ShmRef {
    /// Attach, copy and detach. `Ok(None)` when the segment is already gone or
    /// shorter than declared; both are normal release races.
    pub fn copy_frame(&self, root: &Path) -> Result<Option<FrameData>> {
        let dtype = Dtype::parse(&self.dtype)?;
        let Some(needed) = FrameData::byte_len(&self.shape, dtype) else {
            debug!("Shared segment '{}' declares an oversized shape {:?}", self.name, self.shape);
            return Ok(None);
        };

        let segment = match SharedSegment::attach(root, &self.name) {
            Ok(segment) => segment,
            Err(e) => {
                debug!("Shared segment '{}' not attachable: {}", self.name, e);
                return Ok(None);
            }
        };

        if segment.len() < needed {
            debug!(
                "Shared segment '{}' holds {} bytes, reference declares {}",
                self.name,
                segment.len(),
                needed
            );
            return Ok(None);
        }

        let data = segment.as_bytes()[..needed].to_vec();
        drop(segment);

        FrameData::new(self.shape.clone(), dtype, data).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reference(name: &str) -> ShmRef {
        ShmRef { name: name.to_string(), shape: vec![2, 2], dtype: "uint16".to_string() }
    }

    #[test]
    fn test_copy_from_segment() {
        let root = TempDir::new().unwrap();
        let pixels: Vec<u8> = [1u16, 2, 3, 4].iter().flat_map(|p| p.to_le_bytes()).collect();
        // Segments are usually page-sized, larger than the plane
        let mut contents = pixels.clone();
        contents.resize(4096, 0);
        std::fs::write(root.path().join("psm_frame"), &contents).unwrap();

        let frame = reference("/psm_frame").copy_frame(root.path()).unwrap().unwrap();
        assert_eq!(frame.shape(), &[2, 2]);
        assert_eq!(frame.as_bytes(), pixels.as_slice());
    }

    #[test]
    fn test_absent_segment_is_no_frame() {
        let root = TempDir::new().unwrap();
        for shape in [vec![], vec![0], vec![16], vec![480, 640], vec![2, 2, 3], vec![usize::MAX, 4]] {
            let shm = ShmRef { name: "released".into(), shape, dtype: "uint16".into() };
            assert!(shm.copy_frame(root.path()).unwrap().is_none());
        }
    }

    #[test]
    fn test_truncated_segment_is_no_frame() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("short"), [0u8; 4]).unwrap();
        assert!(reference("short").copy_frame(root.path()).unwrap().is_none());

        let oversized = ShmRef { name: "short".into(), shape: vec![usize::MAX, 4], dtype: "uint16".into() };
        assert!(oversized.copy_frame(root.path()).unwrap().is_none());
    }
}
