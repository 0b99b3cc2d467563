//! Build-progress status reporting and live subprocess output multiplexing
//! -- grounded on `progress.py`'s terminal status line and spec §4.J.

pub mod live;
pub mod reporter;

pub use live::{LiveOutputMux, Stream};
pub use reporter::{Progress, Task};
