//! Flow handlers.
//!
//! Each file in this module corresponds to one user-facing command:
//!
//! | File          | Invocation                | Description                         |
//! |---------------|---------------------------|-------------------------------------|
//! | `backup.rs`   | `nuckie-backup backup`    | Capture this host to the share      |
//! | `restore.rs`  | `nuckie-backup restore`   | Restore a chosen backup onto it     |

pub mod backup;
pub mod restore;
