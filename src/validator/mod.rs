//! Health validation pipelines for proxies and accounts.

mod account;
mod proxy;

pub use account::AccountValidator;
pub use proxy::{HttpProxyProbe, ProbeResponse, ProxyProbe, ProxyValidator, ProxyValidatorConfig};
