mod common;

use anyhow::Result;
use client_core::{ClientError, SaultClient, inject_client_key};
use common::{Bastion, HOST_PASSWORD, PasswordBackend};
use sault_types::{
    ErrorType, commands::{HostListRequest, UserAddRequest, UserLinkRequest, UserListRequest, UserRemoveRequest, WhoamiRequest}
};
use secrecy::SecretString;
use state_store::test_support::generate_public_key;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn typed_requests_round_trip() -> Result<()> {
    let bastion = Bastion::start(common::pick_free_port()).await?;
    let client = SaultClient::connect(&bastion.target, bastion.root_key.clone()).await?;

    let me = client.request(&WhoamiRequest {}).await?;
    assert_eq!(me.id, "root");
    assert!(me.is_admin);

    let added = client
        .request(&UserAddRequest {
            id: "bob".into(),
            public_key: generate_public_key(),
        })
        .await?;
    assert_eq!(added.id, "bob");

    let state = client
        .request(&UserLinkRequest {
            user_id: "bob".into(),
            host_id: "web1".into(),
            accounts: vec!["deploy".into()],
            all: false,
            unlink: false,
        })
        .await?;
    assert!(state.link.is_some_and(|link| link.allows("deploy")));

    let users = client.request(&UserListRequest::default()).await?;
    let ids: Vec<_> = users.iter().map(|entry| entry.user.id.as_str()).collect();
    assert!(ids.contains(&"bob") && ids.contains(&"alice"));

    let hosts = client.request(&HostListRequest::default()).await?;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].id, "web1");

    client.disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_keep_their_kind() -> Result<()> {
    let bastion = Bastion::start(common::pick_free_port()).await?;
    let client = SaultClient::connect(&bastion.target, bastion.root_key.clone()).await?;

    let err = client
        .request(&UserRemoveRequest { id: "nobody".into() })
        .await
        .expect_err("unknown user");
    assert!(matches!(err, ClientError::Response { error_type: ErrorType::Registry, .. }), "{err:?}");
    assert!(err.to_string().contains("nobody"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_admins_cannot_open_control_sessions() -> Result<()> {
    let bastion = Bastion::start(common::pick_free_port()).await?;
    let err = SaultClient::connect(&bastion.target, bastion.alice_key.clone())
        .await
        .err()
        .expect("alice is not an admin");
    assert!(matches!(err, ClientError::AuthFailed(_)), "{err:?}");
    assert!(err.hint().is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inject_tunnels_through_sault() -> Result<()> {
    let backend = PasswordBackend::start().await?;
    let bastion = Bastion::start(backend.port).await?;
    let client = SaultClient::connect(&bastion.target, bastion.root_key.clone()).await?;

    let outcome = inject_client_key(&client, "web1", None, SecretString::from(HOST_PASSWORD.to_string())).await?;
    assert_eq!(outcome.account, "deploy");
    assert!(outcome.added);

    let expected = ssh_core::keys::public_key_line(bastion.client_key.public_key())?;
    let commands = backend.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("deploy: "));
    assert!(commands[0].contains(&expected));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inject_with_wrong_password_fails() -> Result<()> {
    let backend = PasswordBackend::start().await?;
    let bastion = Bastion::start(backend.port).await?;
    let client = SaultClient::connect(&bastion.target, bastion.root_key.clone()).await?;

    let err = inject_client_key(&client, "web1", Some("deploy"), SecretString::from("wrong".to_string()))
        .await
        .expect_err("password is wrong");
    assert!(matches!(err, ClientError::AuthFailed(_)), "{err:?}");
    assert!(backend.commands().is_empty());
    Ok(())
}
