use thiserror::Error;
use warden_store::StoreError;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {}

impl StoreError for Error {}
