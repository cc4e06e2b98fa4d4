//! Core type aliases

/// Standard Result type for the crate
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{Error, GpuError};

    #[test]
    fn test_result_carries_crate_error() {
        let failed: Result<()> = Err(GpuError::OutOfMemory { name: "scratch".into(), size: 64 }.into());
        assert!(matches!(failed, Err(Error::Gpu(_))));
    }
}
