use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempmail_client::{DeleteSupport, Error, HttpOptions, OneSecMail, Provider};

fn adapter(server: &MockServer) -> OneSecMail {
    OneSecMail::with_base_url(server.url("/api/v1/"), HttpOptions::default()).unwrap()
}

#[tokio::test]
async fn explicit_address_needs_no_request() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.path("/api/v1/");
            then.status(500);
        })
        .await;

    let account = adapter(&server)
        .create_account(Some("bob"), Some("1secmail.com"))
        .await
        .unwrap();

    assert_eq!(account.address, "bob@1secmail.com");
    assert_eq!(account.token, None);
    any.assert_hits_async(0).await;
}

#[tokio::test]
async fn random_mailbox_comes_from_upstream() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/")
                .query_param("action", "genRandomMailbox")
                .query_param("count", "1");
            then.status(200).json_body(json!(["x7k2p@1secmail.org"]));
        })
        .await;

    let account = adapter(&server).create_account(None, None).await.unwrap();

    generate.assert_async().await;
    assert_eq!(account.address, "x7k2p@1secmail.org");
    assert!(account.is_well_formed());
}

#[tokio::test]
async fn username_only_takes_first_domain() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/")
                .query_param("action", "getDomainList");
            then.status(200)
                .json_body(json!(["1secmail.com", "1secmail.org", "esiix.com"]));
        })
        .await;

    let account = adapter(&server)
        .create_account(Some("carol"), None)
        .await
        .unwrap();
    assert_eq!(account.address, "carol@1secmail.com");
}

#[tokio::test]
async fn malformed_generated_mailbox_is_rejected() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.query_param("action", "genRandomMailbox");
            then.status(200).json_body(json!(["not-an-address"]));
        })
        .await;

    let err = adapter(&server).create_account(None, None).await.unwrap_err();
    assert!(matches!(err, Error::AccountCreation { provider: "1secmail", .. }));
}

#[tokio::test]
async fn get_messages_splits_address_into_login_and_domain() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/")
                .query_param("action", "getMessages")
                .query_param("login", "bob")
                .query_param("domain", "1secmail.com");
            then.status(200).json_body(json!([
                {"id": 639, "from": "someone@example.com", "subject": "Some subject", "date": "2024-02-10 08:30:00"},
                {"id": 640, "from": "Shop <shop@example.com>", "subject": "Receipt", "date": "2024-02-10 09:00:00"}
            ]));
        })
        .await;

    let messages = adapter(&server)
        .get_messages("bob@1secmail.com")
        .await
        .unwrap();

    list.assert_async().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, "639");
    assert_eq!(messages[0].from.display_name(), "someone@example.com");
    assert_eq!(messages[1].from.display_name(), "Shop");
    assert_eq!(messages[1].created_at.to_rfc3339(), "2024-02-10T09:00:00+00:00");
}

#[tokio::test]
async fn key_without_at_sign_is_empty_list() {
    let server = MockServer::start_async().await;
    let list = server
        .mock_async(|when, then| {
            when.query_param("action", "getMessages");
            then.status(200).json_body(json!([]));
        })
        .await;

    assert!(adapter(&server).get_messages("jwt-token").await.unwrap().is_empty());
    list.assert_hits_async(0).await;
}

#[tokio::test]
async fn read_message_maps_bodies_and_attachments() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/")
                .query_param("action", "readMessage")
                .query_param("id", "639");
            then.status(200).json_body(json!({
                "id": 639,
                "from": "someone@example.com",
                "subject": "Some subject",
                "date": "2024-02-10 08:30:00",
                "attachments": [{"filename": "iometer.pdf", "contentType": "application/pdf", "size": 47412}],
                "body": "<p>Some message body</p>",
                "textBody": "Some message body",
                "htmlBody": "<p>Some message body</p>"
            }));
        })
        .await;

    let message = adapter(&server)
        .get_message("bob@1secmail.com", "639")
        .await
        .unwrap();

    assert!(message.metadata_complete);
    assert_eq!(message.text, "Some message body");
    assert_eq!(message.html, Some(vec!["<p>Some message body</p>".to_string()]));
    let attachment = &message.attachments.unwrap()[0];
    assert_eq!(attachment.size_label().as_deref(), Some("46.3 KB"));
    assert!(attachment.download_url.contains("action=download"));
    assert!(attachment.download_url.contains("file=iometer.pdf"));
}

#[tokio::test]
async fn delete_is_cache_only() {
    let server = MockServer::start_async().await;
    let one_sec = adapter(&server);

    assert_eq!(one_sec.delete_support(), DeleteSupport::ClientCacheOnly);
    let err = one_sec
        .delete_message("bob@1secmail.com", "639")
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
}

#[tokio::test]
async fn get_domains_is_plain_list() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.query_param("action", "getDomainList");
            then.status(200).json_body(json!(["1secmail.com", "wwjmp.com"]));
        })
        .await;

    let domains: Vec<String> = adapter(&server).get_domains().await.unwrap();
    assert_eq!(domains, vec!["1secmail.com".to_string(), "wwjmp.com".to_string()]);
}
