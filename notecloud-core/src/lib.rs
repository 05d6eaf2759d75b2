mod client;

pub use client::{ApiErrorClass, CloudClient, CloudError, Profile};
