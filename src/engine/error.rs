use crate::engine::pause::ThreadState;
use crate::runtime::{FrameId, ScriptId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- state machine errors --------------------------------------
    #[error("operation is not allowed while the thread is `{0}`")]
    WrongState(ThreadState),
    #[error("thread engine has exited")]
    Exited,
    #[error("trying to resume in the wrong order")]
    WrongOrder,
    #[error("nothing to interrupt")]
    NotInterrupted,

    // --------------------------------- entity not found ------------------------------------------
    #[error("frame {0:?} not found")]
    FrameNotFound(FrameId),
    #[error("frame {0:?} is no longer on the stack")]
    FrameNotOnStack(FrameId),

    // --------------------------------- instrumentation errors ------------------------------------
    #[error("breakpoint instrumentation failed for script {0:?}: {1}")]
    Instrumentation(ScriptId, anyhow::Error),

    // --------------------------------- third party errors ----------------------------------------
    #[error("hook: {0}")]
    Hook(anyhow::Error),
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole process.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::WrongState(_) => false,
            Error::WrongOrder => false,
            Error::NotInterrupted => false,
            Error::FrameNotFound(_) => false,
            Error::FrameNotOnStack(_) => false,
            Error::Instrumentation(_, _) => false,
            Error::Hook(_) => false,

            // currently fatal errors
            Error::Exited => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "engine", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "engine", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
