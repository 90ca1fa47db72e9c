//! # 错误处理宏

/// 快速创建配置错误的宏
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RelayError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::config(format!($fmt, $($arg)*))
    };
}

/// 快速创建请求构建错误的宏
#[macro_export]
macro_rules! request_build_error {
    ($msg:expr) => {
        $crate::error::RelayError::request_build($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::request_build(format!($fmt, $($arg)*))
    };
}

/// 快速创建内部错误的宏
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::RelayError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RelayError::internal(format!($fmt, $($arg)*))
    };
}
