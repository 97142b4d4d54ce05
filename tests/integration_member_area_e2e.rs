use std::time::{SystemTime, UNIX_EPOCH};
use serde_json::json;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;

// Shared test context
struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

static REDIS_CLIENT: Lazy<redis::Client> = Lazy::new(|| {
    redis::Client::open("redis://127.0.0.1:6380/").unwrap()
});

impl TestContext {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .cookie_store(true)
                .build()
                .unwrap(),
            base_url: "http://127.0.0.1:3000".to_string(),
        }
    }

    fn get_timestamp() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }
}

async fn get_redis_conn() -> ConnectionManager {
    REDIS_CLIENT.get_connection_manager().await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn setup() {
        let mut con = get_redis_conn().await;
        let _: () = redis::cmd("DEL").arg("rate_limit:register:127.0.0.1").query_async(&mut con).await.unwrap();
    }

    /// Registers a platform owner and returns the CSRF token to send back.
    async fn register_owner(context: &TestContext, suffix: u128) -> String {
        let response = context.client.post(format!("{}/api/auth/register", context.base_url))
            .json(&json!({
                "name": "Course Owner",
                "username": format!("owner_{}", suffix),
                "email": format!("owner_{}@example.com", suffix),
                "password": "SecurePass123!@#"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 201, "Registration failed");
        let cookies = response.cookies().collect::<Vec<_>>();
        let csrf_cookie = cookies.iter().find(|c| c.name() == "csrf_token").expect("CSRF token not found in register response");
        csrf_cookie.value().to_string()
    }

    async fn post_json(context: &TestContext, csrf: &str, path: &str, body: Value) -> reqwest::Response {
        context.client.post(format!("{}{}", context.base_url, path))
            .header("X-CSRF-Token", csrf)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires a running server, PostgreSQL and Redis"]
    async fn test_paid_module_unlocks_after_grant() {
        setup().await;
        let owner = TestContext::new();
        let student = TestContext::new();
        let suffix = TestContext::get_timestamp();
        let csrf = register_owner(&owner, suffix).await;
        let student_email = format!("student_{}@example.com", suffix);

        // Step 1: Area, paid module and one lesson
        let area: Value = post_json(&owner, &csrf, "/api/areas", json!({
            "name": "Guitar School",
            "slug": format!("guitar-{}", suffix)
        })).await.json().await.unwrap();
        let area_id = area["id"].as_str().unwrap().to_string();

        let module_response = post_json(&owner, &csrf, &format!("/api/areas/{}/modules", area_id), json!({
            "title": "Advanced Chords",
            "status": "published",
            "is_paid": true,
            "paid_price_cents": 4900,
            "paid_currency": "EUR",
            "paid_cohorts": null
        })).await;
        assert_eq!(module_response.status().as_u16(), 201, "Module creation failed");
        let module: Value = module_response.json().await.unwrap();
        let module_id = module["id"].as_str().unwrap().to_string();

        let lesson_response = post_json(&owner, &csrf, &format!("/api/areas/{}/lessons", area_id), json!({
            "module_id": module_id,
            "title": "Barre chords",
            "status": "published",
            "video_url": "https://cdn.example.com/barre.mp4",
            "duration_seconds": 600
        })).await;
        assert_eq!(lesson_response.status().as_u16(), 201, "Lesson creation failed");
        let lesson: Value = lesson_response.json().await.unwrap();
        let lesson_id = lesson["id"].as_str().unwrap().to_string();

        // Step 2: Roster entry with a custom login password
        let student_response = post_json(&owner, &csrf, &format!("/api/areas/{}/students", area_id), json!({
            "email": student_email,
            "password": "StudentPass123"
        })).await;
        assert_eq!(student_response.status().as_u16(), 200, "Roster update failed");

        // Step 3: Student logs in and sees the module blocked
        let login_response = student.client.post(format!("{}/api/members/{}/login", student.base_url, area_id))
            .json(&json!({ "email": student_email, "password": "StudentPass123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(login_response.status().as_u16(), 200, "Member login failed");

        let overview: Value = student.client.get(format!("{}/api/members/{}/modules", student.base_url, area_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(overview["modules"][0]["access"]["is_paid_blocked"], true);

        let lesson_response = student.client.get(format!("{}/api/members/{}/lessons/{}", student.base_url, area_id, lesson_id))
            .send()
            .await
            .unwrap();
        assert_eq!(lesson_response.status().as_u16(), 402, "Paid lesson should require payment");

        // Step 4: Owner grants the module, student now has access
        let grant_response = post_json(&owner, &csrf, &format!("/api/areas/{}/modules/{}/grants", area_id, module_id), json!({
            "email": student_email
        })).await;
        assert_eq!(grant_response.status().as_u16(), 201, "Grant failed");

        let lesson_response = student.client.get(format!("{}/api/members/{}/lessons/{}", student.base_url, area_id, lesson_id))
            .send()
            .await
            .unwrap();
        assert_eq!(lesson_response.status().as_u16(), 200, "Granted lesson should be playable");
        let lesson_view: Value = lesson_response.json().await.unwrap();
        assert_eq!(lesson_view["playback"]["kind"], "video");

        // Step 5: Progress is accepted and eventually completes the course
        let progress_response = student.client.post(format!("{}/api/members/{}/lessons/{}/progress", student.base_url, area_id, lesson_id))
            .json(&json!({ "current_time_seconds": 590.0, "duration_seconds": 600.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(progress_response.status().as_u16(), 202);

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let summary: Value = student.client.get(format!("{}/api/members/{}/progress", student.base_url, area_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["percentage"], 100);
    }

    #[tokio::test]
    #[ignore = "requires a running server, PostgreSQL and Redis"]
    async fn test_roster_cohort_change_applies_without_new_login() {
        setup().await;
        let owner = TestContext::new();
        let student = TestContext::new();
        let suffix = TestContext::get_timestamp();
        let csrf = register_owner(&owner, suffix).await;
        let student_email = format!("cohort_{}@example.com", suffix);

        let area: Value = post_json(&owner, &csrf, "/api/areas", json!({
            "name": "Piano School",
            "slug": format!("piano-{}", suffix)
        })).await.json().await.unwrap();
        let area_id = area["id"].as_str().unwrap().to_string();

        let cohort: Value = post_json(&owner, &csrf, &format!("/api/areas/{}/cohorts", area_id), json!({
            "name": "Premium"
        })).await.json().await.unwrap();
        let cohort_id = cohort["id"].as_str().unwrap().to_string();

        // Paid only for the premium cohort
        let module_response = post_json(&owner, &csrf, &format!("/api/areas/{}/modules", area_id), json!({
            "title": "Masterclass",
            "status": "published",
            "is_paid": true,
            "paid_price_cents": 9900,
            "paid_currency": "EUR",
            "paid_cohorts": [cohort_id]
        })).await;
        assert_eq!(module_response.status().as_u16(), 201, "Module creation failed");

        let student_response = post_json(&owner, &csrf, &format!("/api/areas/{}/students", area_id), json!({
            "email": student_email,
            "password": "StudentPass123"
        })).await;
        assert_eq!(student_response.status().as_u16(), 200, "Roster update failed");

        let login_response = student.client.post(format!("{}/api/members/{}/login", student.base_url, area_id))
            .json(&json!({ "email": student_email, "password": "StudentPass123" }))
            .send()
            .await
            .unwrap();
        assert_eq!(login_response.status().as_u16(), 200, "Member login failed");

        let modules_url = format!("{}/api/members/{}/modules", student.base_url, area_id);
        let overview: Value = student.client.get(&modules_url).send().await.unwrap().json().await.unwrap();
        assert_eq!(overview["modules"][0]["access"]["is_paid_blocked"], false);

        // Moving the student into the cohort takes effect on the next request
        let student_response = post_json(&owner, &csrf, &format!("/api/areas/{}/students", area_id), json!({
            "email": student_email,
            "cohort_id": cohort_id
        })).await;
        assert_eq!(student_response.status().as_u16(), 200, "Roster update failed");

        let overview: Value = student.client.get(&modules_url).send().await.unwrap().json().await.unwrap();
        assert_eq!(overview["modules"][0]["access"]["is_paid_blocked"], true);
    }

    #[tokio::test]
    #[ignore = "requires a running server, PostgreSQL and Redis"]
    async fn test_embedded_session_without_identity_has_no_redirect() {
        let context = TestContext::new();
        let area_id = "6c1f3b9e-2a53-4c3e-9d7a-0a1b2c3d4e5f";

        let response = context.client.get(format!("{}/api/members/{}/session?embedded=true", context.base_url, area_id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let body: Value = response.json().await.unwrap();
        assert!(body["redirect"].is_null());

        let response = context.client.get(format!("{}/api/members/{}/session", context.base_url, area_id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["redirect"], format!("/members/{}/login", area_id));
    }

    #[tokio::test]
    #[ignore = "requires a running server, PostgreSQL and Redis"]
    async fn test_webhook_rejects_wrong_secret() {
        let context = TestContext::new();
        let response = context.client.post(format!("{}/api/payments/webhook", context.base_url))
            .header("x-webhook-secret", "definitely-not-the-secret")
            .json(&json!({
                "payment_id": "6c1f3b9e-2a53-4c3e-9d7a-0a1b2c3d4e5f",
                "status": "paid"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);
    }
}
