//! Virtual Null-Modem
//!
//! Two emulated serial ports cross-wired so that bytes written to one are
//! read from the other. Each port has a bounded receive queue and at most
//! one pending read, which finishes exactly once: with data from the peer,
//! with zero bytes when its timeout expires, or cancelled.
//!
//! ```no_run
//! use null_modem::{NullModem, PairConfig, PortId};
//!
//! # async fn demo() -> Result<(), null_modem::NullModemError> {
//! let modem = NullModem::load(PairConfig::default())?;
//! modem.write(PortId::B, b"hello")?;
//! let completion = modem.read_async(PortId::A, 16).await?;
//! assert_eq!(completion.data, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ioctl;
mod modem;
mod pending;
mod port;
mod read;
mod registry;
mod timer;
mod writer;

pub use config::{LineControl, PairConfig, SerialConfig, Timeouts};
pub use error::{status, NullModemError};
pub use ioctl::{CommProperties, CommStatus, SerialControl};
pub use modem::ModemStatus;
pub use pending::{
    CancelGuard, CancelHandle, CompletionFn, CompletionSource, ReadCompletion, ReadPoll,
    ReadRequest, ReadStatus,
};
pub use port::{Port, PortId, PortStats};
pub use registry::{NullModem, PortRegistry};
pub use ring_buffer::ByteRing;
pub use timer::DispatchContext;
