//! flatfs error types

use std::io;

use thiserror::Error;

/// flatfs Result type
pub type FsResult<T> = Result<T, FsError>;

/// flatfs error types
///
/// Every failure is returned synchronously; nothing is retried internally and
/// a failed multi-step mutation is not rolled back.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path component missing
    #[error("no such file or directory")]
    NotFound,
    /// Name already present in the target directory
    #[error("entry already exists")]
    AlreadyExists,
    /// A file was found where a directory was required
    #[error("not a directory")]
    NotADirectory,
    /// A directory was found where a file was required
    #[error("is a directory")]
    IsADirectory,
    /// Block or inode index, buffer length, or read/seek/write length outside valid bounds
    #[error("index or length out of range")]
    OutOfRange,
    /// Underlying image read/write failure
    #[error("I/O fault: {0}")]
    IoFault(#[from] io::Error),
    /// No free block or inode left
    #[error("no space left in image")]
    NoSpace,
    /// Format parameters rejected
    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),
    /// Name cannot be stored as a directory entry
    #[error("invalid entry name")]
    InvalidName,
    /// On-disk data does not decode
    #[error("corrupted image: {0}")]
    Corrupted(&'static str),
    /// Session operation with no image loaded
    #[error("no image loaded")]
    NotLoaded,
}

impl FsError {
    /// Convert to errno-style error code
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound => -2,           // ENOENT
            FsError::IoFault(_) => -5,         // EIO
            FsError::AlreadyExists => -17,     // EEXIST
            FsError::NotADirectory => -20,     // ENOTDIR
            FsError::IsADirectory => -21,      // EISDIR
            FsError::InvalidGeometry(_) => -22, // EINVAL
            FsError::InvalidName => -22,
            FsError::NoSpace => -28,           // ENOSPC
            FsError::OutOfRange => -34,        // ERANGE
            FsError::Corrupted(_) => -5,       // EIO (corruption)
            FsError::NotLoaded => -19,         // ENODEV
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), -2);
        assert_eq!(FsError::NoSpace.to_errno(), -28);
        let io = FsError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert_eq!(io.to_errno(), -5);
        assert!(io.to_string().contains("disk gone"));
    }
}
