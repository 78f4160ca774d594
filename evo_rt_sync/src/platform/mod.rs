//! Platform layer: futex and Linux system calls.

pub mod futex;
pub mod linux;

pub use futex::{FutexWait, futex_wait, futex_wake, futex_wake_all};
pub use linux::{
    current_thread_is_rt, lock_memory, memfd_create, set_current_thread_affinity,
    set_current_thread_fifo,
};
