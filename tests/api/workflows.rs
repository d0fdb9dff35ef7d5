use crate::helpers::{spawn_app, subscription_body};
use chrono::{Duration, Utc};
use uuid::Uuid;

#[tokio::test]
async fn a_subscription_renewing_within_a_week_gets_its_first_reminder_right_away() {
    // arrange
    let app = spawn_app().await;
    let renewal = Utc::now() + Duration::days(7) - Duration::minutes(5);

    // act
    let id = app.create_subscription(&subscription_body(renewal)).await;
    let sent = app.wait_for_emails(1).await;

    // assert
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, app.test_user.email);
    assert_eq!(sent[0].subject, "Your Netflix Premium subscription renews in 7 days");
    assert!(sent[0].text_content.contains("15.49 USD"));

    let response = app
        .post_reminder_trigger(format!(r#"{{"subscriptionId":"{}"}}"#, id), "text/plain")
        .await;
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["outcome"], "already_started");
    assert_eq!(app.email_client.sent().len(), 1);
}

#[tokio::test]
async fn a_canceled_subscription_is_never_reminded() {
    let app = spawn_app().await;
    let mut body = subscription_body(Utc::now() + Duration::days(3));
    body["status"] = "canceled".into();

    let id = app.create_subscription(&body).await;
    let response = app
        .post_reminder_trigger(format!(r#"{{"subscriptionId":"{}"}}"#, id), "application/json")
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["outcome"], "terminated");
    assert_eq!(body["data"]["reason"], "inactive");
    assert!(app.email_client.sent().is_empty());
}

#[tokio::test]
async fn triggering_an_unknown_subscription_terminates_the_workflow() {
    let app = spawn_app().await;
    let id = Uuid::new_v4();

    let response = app
        .post_reminder_trigger(
            format!(r#"{{"subscriptionId":"{}"}}"#, id),
            "application/octet-stream",
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["data"]["subscriptionId"], id.to_string());
    assert_eq!(body["data"]["outcome"], "terminated");
    assert_eq!(body["data"]["reason"], "not_found");
}

#[tokio::test]
async fn triggering_with_a_bad_payload_returns_a_400() {
    let app = spawn_app().await;
    let test_cases = vec![
        ("", "an empty body"),
        ("subscriptionId=42", "a form body"),
        (r#"{"subscriptionId": 42}"#, "a numeric id"),
        (r#"{"subscriptionId": "42"}"#, "a malformed id"),
        (r#"{"id": "3a7c1bd4-8d8f-4d5c-9f4e-0d2f8a1b6c3e"}"#, "no id"),
    ];

    for (payload, description) in test_cases {
        let response = app.post_reminder_trigger(payload, "application/json").await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not return a 400 Bad Request for {}.",
            description
        );
    }
}
