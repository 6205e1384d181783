//! crosscall - call native functions by address, without a C bridge
//!
//! Build a typed argument list, hand it with a function address to the
//! invoker, and read the decoded result back. Addresses usually come from the
//! dynamic loader; native code can call back in through a callback context.
//!
//! ```no_run
//! use crosscall::{Arg, Out};
//! # fn main() -> crosscall::Result<()> {
//! let strlen = crosscall::loader::lookup("strlen")?;
//! let mut len = 0usize;
//! unsafe { strlen.call(Out::Usize(&mut len), &[Arg::Bytes(b"crosscall\0")])? };
//! assert_eq!(len, 9);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod error;
pub mod interop;
#[cfg(unix)]
pub mod loader;

// Ambient
pub mod config;
pub mod logging;

// Re-export commonly used items
pub use config::Config;
pub use error::{Error, Result};
pub use interop::{
    call, Arg, ArgKind, CallbackContext, ConventionDescriptor, Frame, FunctionCall, Out,
    PinnedContext, SpillPolicy, Subscription,
};
#[cfg(unix)]
pub use loader::{last_error, Image, Mode, Scope, Symbol};

/// Apply a configuration: logging first, then the default calling
/// convention and loader settings
pub fn init(config: &Config) -> Result<()> {
    logging::init_with_config(config.logging.to_log_config());
    interop::init(&config.invoke)?;
    #[cfg(unix)]
    loader::init(&config.loader);
    tracing::debug!(convention = %config.invoke.convention, "crosscall initialized");
    Ok(())
}

/// Apply the configuration discovered from the working directory
pub fn init_from_env() -> Result<()> {
    init(&Config::discover())
}
