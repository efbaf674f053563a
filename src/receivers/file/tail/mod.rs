// SPDX-License-Identifier: Apache-2.0

pub mod manager;
pub mod supervisor;
pub mod task;

pub use manager::TailManager;
pub use supervisor::TailSupervisor;
pub use task::{TailContext, TailHandle, TailWork};
