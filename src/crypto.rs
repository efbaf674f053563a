// SPDX-License-Identifier: Apache-2.0

use rustls::crypto::CryptoProvider;
use tower::BoxError;
use tracing::debug;

/// Install aws-lc-rs as the process-wide rustls provider, unless one is
/// already installed. Must run before the remote-write client is built.
pub fn init_crypto_provider() -> Result<(), BoxError> {
    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    match rustls::crypto::aws_lc_rs::default_provider().install_default() {
        Ok(()) => {
            debug!("Installed aws-lc-rs crypto provider.");
            Ok(())
        }
        // Lost a race with another installer, which is fine.
        Err(_) if CryptoProvider::get_default().is_some() => Ok(()),
        Err(e) => Err(format!("failed to initialize crypto library: {:?}", e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        init_crypto_provider().unwrap();
        init_crypto_provider().unwrap();
        assert!(CryptoProvider::get_default().is_some());
    }
}
