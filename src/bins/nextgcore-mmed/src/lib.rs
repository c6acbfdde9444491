//! NextGCore MME (Mobility Management Entity) Library
//!
//! Per-UE EPS Mobility Management of the MME. Uplink NAS messages, S11 and
//! S6a answers and EMM timer expiries are turned into procedure progress:
//! - attach, authentication and security mode
//! - Update-Location fan-out to the bearers' ESM state machines
//! - paging with bounded T3413 retransmission
//! - detach, tracking area update and service request

pub mod config;
pub mod context;
pub mod emm_handler;
pub mod emm_sm;
pub mod event;
pub mod kdf;
pub mod nas_message;
pub mod paging;
pub mod path;
pub mod sm;
pub mod timer;
pub mod worker;


// Re-export commonly used types
pub use config::{ConfigError, MmeConfig, MAX_NUM_OF_PAGING};
pub use context::{
    MmeBearer, MmeBearerId, MmeContext, MmeSess, MmeSessId, MmeStore, MmeUe, MmeUeId, PoolId,
};
pub use emm_handler::{EmmError, EmmHandler, EmmResult, MmeEmmHandler};
pub use emm_sm::EmmSmContext;
pub use event::{EventQueue, MmeEvent, MmeTimerId, S11Message, S6aCommand, S6aMessage};
pub use nas_message::{EmmMessage, NasMessage, SecurityHeaderType};
pub use path::{EmmPath, MmePath, OutboundRequest};
pub use sm::{mme_sm_debug, EmmFsm, EmmFsmResult, EmmState};
pub use timer::{MmeTimerConfigs, TimerManager};
pub use worker::{spawn_workers, EmmDispatcher, EmmWorker, SharedContext};
