pub mod debounce;
pub mod engine;
pub mod externalize;
pub mod merge;
pub mod partition;
