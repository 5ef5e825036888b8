mod common;

use common::{EMAIL, GOOD_TOKEN, PASSWORD, PUBLISHABLE_KEY, USER_ID, start_auth};
use llm_ocr_rust::auth::{AuthError, Authenticator, BackendAuth, resolve_session};

const SESSION_VARS: [&str; 3] = ["OCR_ACCESS_TOKEN", "OCR_EMAIL", "OCR_PASSWORD"];

fn set_session_env(vars: &[(&str, &str)]) {
    // SAFETY: only `session_is_resolved_from_environment` touches these
    // variables, and nothing else in this test binary reads the environment.
    unsafe {
        for key in SESSION_VARS {
            std::env::remove_var(key);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
    }
}

#[tokio::test]
async fn password_sign_in_returns_a_session() {
    let (auth_url, _) = start_auth().await;
    let auth = BackendAuth::new(auth_url, PUBLISHABLE_KEY);

    let session = auth.sign_in_with_password(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(session.access_token, GOOD_TOKEN);
    assert_eq!(session.user_id, USER_ID);

    let err = auth
        .sign_in_with_password(EMAIL, "wrong")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sign in failed"), "{}", err);
    assert!(err.to_string().contains("Invalid login credentials"), "{}", err);
}

#[tokio::test]
async fn sign_in_requires_the_publishable_key() {
    let (auth_url, _) = start_auth().await;
    let auth = BackendAuth::new(auth_url, "other-key");
    assert!(auth.sign_in_with_password(EMAIL, PASSWORD).await.is_err());
}

#[tokio::test]
async fn tokens_are_verified_against_the_auth_service() {
    let (auth_url, calls) = start_auth().await;
    let auth = BackendAuth::new(format!("{}/", auth_url), PUBLISHABLE_KEY);

    let session = auth.session_from_token(GOOD_TOKEN).await.unwrap();
    assert_eq!(session.user_id, USER_ID);
    assert_eq!(session.access_token, GOOD_TOKEN);

    assert!(auth.session_from_token("stale-token").await.is_err());
    assert!(matches!(
        auth.verify("stale-token").await,
        Err(AuthError::InvalidToken)
    ));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreachable_auth_service_is_unavailable() {
    let auth = BackendAuth::new("http://127.0.0.1:9", PUBLISHABLE_KEY);
    assert!(matches!(
        auth.verify(GOOD_TOKEN).await,
        Err(AuthError::Unavailable(_))
    ));
}

#[tokio::test]
async fn session_is_resolved_from_environment() {
    let (auth_url, _) = start_auth().await;
    let auth = BackendAuth::new(auth_url, PUBLISHABLE_KEY);

    set_session_env(&[("OCR_ACCESS_TOKEN", GOOD_TOKEN)]);
    let session = resolve_session(&auth).await.unwrap();
    assert_eq!(session.access_token, GOOD_TOKEN);
    assert_eq!(session.user_id, USER_ID);

    set_session_env(&[("OCR_EMAIL", EMAIL), ("OCR_PASSWORD", PASSWORD)]);
    let session = resolve_session(&auth).await.unwrap();
    assert_eq!(session.user_id, USER_ID);

    set_session_env(&[("OCR_ACCESS_TOKEN", "  "), ("OCR_EMAIL", EMAIL)]);
    let err = resolve_session(&auth).await.unwrap_err();
    assert!(err.to_string().contains("not signed in"), "{}", err);

    set_session_env(&[]);
}
