//! Driver dispatch macro.
//!
//! Generates the match over `DriverAdapter` variants so every trait method
//! forwards to the concrete driver in one line. Variants behind a cargo
//! feature carry their `#[cfg]` on the generated arm.

/// Forward an expression to whichever driver the adapter wraps.
///
/// # Example
///
/// ```ignore
/// impl_adapter_dispatch!(self, a => a.fetch_all(stmt).await)
/// ```
#[macro_export]
macro_rules! impl_adapter_dispatch {
    ($adapter:expr, $a:ident => $body:expr) => {
        match $adapter {
            $crate::db::DriverAdapter::MySql($a) => $body,
            $crate::db::DriverAdapter::Postgres($a) => $body,
            #[cfg(feature = "mssql")]
            $crate::db::DriverAdapter::Mssql($a) => $body,
            #[cfg(feature = "oracle")]
            $crate::db::DriverAdapter::Oracle($a) => $body,
        }
    };
}

pub use impl_adapter_dispatch;
