mod error;
pub use error::{ExecError, ExecResult};

mod session;
pub use session::{
    ExecCommand, ExecOutput, ExecSession, ExecStream, ProcessState, SessionFactory, SessionRef,
};

mod stats;
mod util;
pub use util::{is_alive, parse_signal};

#[cfg(feature = "proc")]
pub mod proc;
#[cfg(feature = "proc")]
pub use proc::{LocalSession, LocalSessionFactory};

pub use nix::sys::signal::Signal;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{ExecCommand, ExecSession, ProcessState, SessionFactory, SessionRef};
}
