// SPDX-License-Identifier: Apache-2.0

//! Keyword receiver for rotating log files.
//!
//! Tracked glob patterns are rescanned periodically. The freshest file per
//! pattern is tailed by its own task; lines matching an application's keywords
//! are rate limited per path and handed to an [`event::AlertDispatch`]. Read
//! offsets survive restarts through the [`persistence::PositionStore`].

pub mod alarm;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod input;
pub mod limiter;
pub mod persistence;
pub mod reconcile;
pub mod tail;

pub use alarm::{AlarmStatus, AlarmTracker};
pub use config::{TailConfig, TrackedFile};
pub use error::{Error, Result};
pub use event::{AlertDispatch, MatchEvent};
pub use filter::{KeywordFilter, SubstringFilter};
pub use input::StartAt;
pub use limiter::RateLimiter;
pub use persistence::{FileOffset, PositionStore};
pub use tail::{TailContext, TailManager, TailSupervisor};
