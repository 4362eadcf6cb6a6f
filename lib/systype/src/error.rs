use strum::FromRepr;

/// Type alias for result of general functions.
pub type SysResult<T> = Result<T, SysError>;

/// Linux specific error codes defined in `errno.h`.
///
/// Only the codes the file server base layer produces or forwards are kept.
// See in "asm-generic/errno-base.h" and "asm-generic/errno.h".
#[derive(FromRepr, Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum SysError {
    /// Operation not permitted
    EPERM = 1,
    /// No such file or directory
    ENOENT = 2,
    /// I/O error
    EIO = 5,
    /// Bad file number
    EBADF = 9,
    /// Try again
    EAGAIN = 11,
    /// Out of memory
    ENOMEM = 12,
    /// Permission denied
    EACCES = 13,
    /// Bad address
    EFAULT = 14,
    /// Device or resource busy
    EBUSY = 16,
    /// File exists
    EEXIST = 17,
    /// Is a directory
    EISDIR = 21,
    /// Invalid argument
    EINVAL = 22,
    /// File too large
    EFBIG = 27,
    /// No space left on device
    ENOSPC = 28,
    /// Read-only file system
    EROFS = 30,
    /// Invalid system call number
    ENOSYS = 38,
    /// Too much data
    EOVERFLOW = 75,
    /// Unsupported
    EOPNOTSUPP = 95,
    /// Stale file.
    ESTALE = 116,
}

impl SysError {
    /// Returns the error description.
    pub const fn as_str(&self) -> &'static str {
        use self::SysError::*;
        match self {
            EPERM => "Operation not permitted",
            ENOENT => "No such file or directory",
            EIO => "I/O error",
            EBADF => "Bad file number",
            EAGAIN => "Try again",
            ENOMEM => "Out of memory",
            EACCES => "Permission denied",
            EFAULT => "Bad address",
            EBUSY => "Device or resource busy",
            EEXIST => "File exists",
            EISDIR => "Is a directory",
            EINVAL => "Invalid argument",
            EFBIG => "File too large",
            ENOSPC => "No space left on device",
            EROFS => "Read-only file system",
            ENOSYS => "Invalid system call number",
            EOVERFLOW => "too much data",
            EOPNOTSUPP => "Unsupported",
            ESTALE => "Stale file handle",
        }
    }

    /// Looks up the error carrying the positive errno `value`.
    pub const fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// Returns the error code value in `i32`.
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Returns the negated code, the form replies carry back to clients.
    pub const fn as_ret(self) -> isize {
        -(self as i32 as isize)
    }
}

impl core::fmt::Display for SysError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}: {}", self, self.as_str())
    }
}
