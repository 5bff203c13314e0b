//! Load data script for entity_db
//!
//! The store is in-memory, so demo data goes in through the running server:
//! logs in as the seeded administrator, then creates demo records over HTTP.
//! Run: cargo run --bin entity_db, then cargo run --bin load_data
//! Target server: ENTITY_DB_URL (default http://localhost:8000).

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

type Error = Box<dyn std::error::Error>;

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct Identity {
    id: i64,
    name: String,
}

#[derive(Deserialize)]
struct Created {
    data: Value,
}

/// Creates one record and returns the id the server assigned.
fn create(
    client: &Client,
    base: &str,
    token: &str,
    entity: &str,
    record: Value,
) -> Result<Value, Error> {
    let res = client
        .post(format!("{}/entities/{}", base, entity))
        .bearer_auth(token)
        .json(&record)
        .send()?;
    if !res.status().is_success() {
        return Err(format!("creating {} failed: {} {}", entity, res.status(), res.text()?).into());
    }
    let created: Created = res.json()?;
    created.data.get("id").cloned().ok_or_else(|| format!("{} reply has no id", entity).into())
}

fn identity_id(client: &Client, base: &str, token: &str, name: &str) -> Result<i64, Error> {
    let identities: Vec<Identity> = client
        .get(format!("{}/users", base))
        .bearer_auth(token)
        .send()?
        .error_for_status()?
        .json()?;
    identities
        .into_iter()
        .find(|i| i.name == name)
        .map(|i| i.id)
        .ok_or_else(|| format!("no identity named {}", name).into())
}

fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    let base = std::env::var("ENTITY_DB_URL").unwrap_or_else(|_| "http://localhost:8000".into());
    let admin_secret = std::env::var("ADMIN_SECRET").unwrap_or_else(|_| "admin123".to_string());
    let client = Client::new();

    let login: LoginResponse = client
        .post(format!("{}/auth/login", base))
        .json(&json!({ "name": "admin", "secret": admin_secret }))
        .send()?
        .error_for_status()?
        .json()?;
    let token = login.token;

    let courses = [
        (
            "Introduction to Computer Science",
            "Basic programming concepts and algorithms",
            "Dr. Smith",
        ),
        ("Web Development", "Full-stack web development with modern frameworks", "Prof. Johnson"),
        ("Database Systems", "Database design and SQL fundamentals", "Dr. Williams"),
    ];
    let mut course_ids = Vec::with_capacity(courses.len());
    for (title, description, instructor) in courses {
        let record = json!({
            "title": title,
            "description": description,
            "instructor": instructor,
        });
        course_ids.push(create(&client, &base, &token, "Course", record)?);
    }
    println!("✅ Created {} Course records", course_ids.len());

    let student_id = identity_id(&client, &base, &token, "student1")?;
    // First and last of this run's courses.
    for course_id in [&course_ids[0], &course_ids[course_ids.len() - 1]] {
        let record = json!({
            "studentId": student_id,
            "courseId": course_id,
            "status": "active",
        });
        create(&client, &base, &token, "Enrollment", record)?;
    }
    let announcement = json!({
        "title": "Welcome",
        "content": "Classes start next Monday.",
        "isPinned": true,
    });
    create(&client, &base, &token, "Announcement", announcement)?;
    println!(
        "✅ Created demo Enrollment and Announcement records for student1 (id {})",
        student_id
    );

    Ok(())
}
