//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `gateway` reads and writes canvas snapshots in the remote store and
//! `directory` lists and creates canvas records. A `session` owns one live
//! scene: it loads through the gateway, queues saves on its `autosave`
//! worker and follows the browser `viewport`. Route handlers only translate
//! frames and requests into calls on these services.

pub mod autosave;
pub mod directory;
pub mod gateway;
pub mod session;
pub mod viewport;
