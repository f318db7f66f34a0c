//! # fermata
//!
//! A bounded pool of reusable outbound connections that notices, without a
//! reader thread per connection, when the peer of an idle connection hangs up.
//!
//! ## Features
//! - **Bounded idle store**: O(1) checkout, return and removal by descriptor.
//! - **Close is release**: dropping a [`PooledConn`] returns it to the pool,
//!   or closes it when the pool is full, closed, or the connection was marked
//!   unusable.
//! - **Kernel liveness watch**: idle descriptors are registered edge-triggered
//!   for hangup/error/half-close (epoll on Linux, kqueue on macOS). One
//!   background thread evicts dead connections and creates replacements.
//!
//! ```rust,no_run
//! use std::io::Write;
//! use std::net::TcpStream;
//!
//! let pool = fermata::Pool::new(2, 8, || TcpStream::connect("127.0.0.1:6379"))?;
//! let mut conn = pool.checkout()?;
//! conn.write_all(b"PING\r\n")?;
//! drop(conn); // back to the pool
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("fermata needs epoll (Linux) or kqueue (macOS)");

pub mod config;
pub mod conn;
pub mod error;
mod idle;
pub mod logging;
pub mod metrics;
/// Liveness loop and raw poller. Crate-private:
///
/// ```compile_fail
/// use fermata::monitor::Monitor;
/// ```
pub(crate) mod monitor;
pub mod pool;
/// ```compile_fail
/// use fermata::syscalls::Poller;
/// ```
pub(crate) mod syscalls;

pub use config::{PoolConfig, ReusePolicy};
pub use conn::PooledConn;
pub use error::{PoolError, PoolResult};
pub use metrics::MetricsSnapshot;
pub use pool::{Factory, Pool, PoolBuilder};
