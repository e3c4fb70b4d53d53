use std::{sync::Arc, time::Duration};

use russh::{
    MethodKind, MethodSet, Preferred, client, keys::PrivateKey, server
};

pub fn default_preferred() -> Preferred {
    Preferred::DEFAULT.clone()
}

/// Server configuration for the client-facing side: public key auth only.
pub fn server_config(host_key: PrivateKey) -> server::Config {
    let mut config = server::Config {
        preferred: default_preferred(),
        auth_rejection_time: Duration::from_millis(250),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        nodelay: true,
        ..Default::default()
    };
    config.methods = MethodSet::empty();
    config.methods.push(MethodKind::PublicKey);
    config.keys.push(host_key);
    config
}

/// Client configuration for outbound connections to hosts and to sault itself.
pub fn client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        preferred: default_preferred(),
        keepalive_interval: Some(Duration::from_secs(30)),
        ..Default::default()
    })
}
