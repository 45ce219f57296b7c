use serde::{Deserialize, Serialize};

pub const REQUIRED_FIELDS: [&str; 4] = ["name", "email", "subject", "message"];
pub const PRIORITIES: [&str; 3] = ["low", "medium", "high"];
pub const DEFAULT_PRIORITY: &str = "medium";
pub const MIN_MESSAGE_CHARS: usize = 10;

/// Fields posted by the contact form. Everything is optional at this point;
/// [`validate`] decides what is acceptable.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ContactForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl ContactForm {
    fn field(&self, name: &str) -> Option<&str> {
        match name {
            "name" => present(&self.name),
            "email" => present(&self.email),
            "subject" => present(&self.subject),
            "message" => present(&self.message),
            "phone" => present(&self.phone),
            "priority" => present(&self.priority),
            _ => None,
        }
    }

    pub fn phone_or_empty(&self) -> &str {
        present(&self.phone).unwrap_or("")
    }

    pub fn priority_or_default(&self) -> &str {
        present(&self.priority).unwrap_or(DEFAULT_PRIORITY)
    }
}

fn is_phone_number(phone: &str) -> bool {
    let digits: String = phone
        .chars()
        .filter(|c| !matches!(c, '-' | '(' | ')' | ' '))
        .collect();
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Returns every problem with the form, in field order. Empty means valid.
pub fn validate(form: &ContactForm) -> Vec<String> {
    let mut errors: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|field| form.field(field).is_none())
        .map(|field| format!("{} is required", field))
        .collect();

    if let Some(email) = form.field("email") {
        if !email.contains('@') {
            errors.push("Invalid email format".to_string());
        }
    }

    if let Some(message) = form.field("message") {
        if message.chars().count() < MIN_MESSAGE_CHARS {
            errors.push(format!(
                "Message must be at least {} characters long",
                MIN_MESSAGE_CHARS
            ));
        }
    }

    if let Some(phone) = form.field("phone") {
        if !is_phone_number(phone) {
            errors.push("Invalid phone number format".to_string());
        }
    }

    if let Some(priority) = form.field("priority") {
        if !PRIORITIES.contains(&priority) {
            errors.push(format!("Priority must be one of {}", PRIORITIES.join(", ")));
        }
    }

    errors
}

/// Row written to the submissions table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submission {
    pub submission_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub subject: String,
    pub message: String,
    pub priority: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Submission {
    /// Builds the stored row from a form that passed [`validate`].
    pub fn from_form(form: &ContactForm, submission_id: String, timestamp: &str) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        Self {
            submission_id,
            name: text(&form.name),
            email: text(&form.email),
            phone: form.phone_or_empty().to_string(),
            subject: text(&form.subject),
            message: text(&form.message),
            priority: form.priority_or_default().to_string(),
            status: "new".to_string(),
            created_at: timestamp.to_string(),
            updated_at: timestamp.to_string(),
        }
    }

    pub fn notification_subject(&self) -> String {
        format!("New Contact Form Submission - {}", self.subject)
    }

    pub fn notification_message(&self) -> String {
        let phone = if self.phone.is_empty() {
            "N/A"
        } else {
            &self.phone
        };
        format!(
            "New Contact Form Submission\n\n\
             Submission ID: {}\n\
             Name: {}\n\
             Email: {}\n\
             Phone: {}\n\
             Subject: {}\n\
             Priority: {}\n\n\
             Message:\n{}\n\n\
             Submitted at: {}",
            self.submission_id,
            self.name,
            self.email,
            phone,
            self.subject,
            self.priority,
            self.message,
            self.created_at
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> ContactForm {
        ContactForm {
            name: Some("Ada Lovelace".to_string()),
            email: Some("ada@example.com".to_string()),
            phone: Some("(555) 123-4567".to_string()),
            subject: Some("Engines".to_string()),
            message: Some("Please send the analytical engine notes.".to_string()),
            priority: Some("high".to_string()),
        }
    }

    #[test]
    fn test_valid_form() {
        assert!(validate(&valid_form()).is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let errors = validate(&ContactForm::default());
        assert_eq!(
            errors,
            vec![
                "name is required",
                "email is required",
                "subject is required",
                "message is required",
            ]
        );
    }

    #[test]
    fn test_empty_string_counts_as_missing() {
        let form = ContactForm {
            name: Some(String::new()),
            ..valid_form()
        };
        assert_eq!(validate(&form), vec!["name is required"]);
    }

    #[test]
    fn test_field_format_errors() {
        let form = ContactForm {
            email: Some("ada.example.com".to_string()),
            message: Some("too short".to_string()),
            phone: Some("555-CALL-NOW".to_string()),
            priority: Some("urgent".to_string()),
            ..valid_form()
        };

        assert_eq!(
            validate(&form),
            vec![
                "Invalid email format",
                "Message must be at least 10 characters long",
                "Invalid phone number format",
                "Priority must be one of low, medium, high",
            ]
        );
    }

    #[test]
    fn test_message_length_counts_characters() {
        let form = ContactForm {
            message: Some("héllo wörl".to_string()),
            ..valid_form()
        };
        assert!(validate(&form).is_empty());
    }

    #[test]
    fn test_submission_defaults() {
        let form = ContactForm {
            phone: None,
            priority: None,
            ..valid_form()
        };
        let submission = Submission::from_form(&form, "id-1".to_string(), "2025-01-01T00:00:00Z");

        assert_eq!(submission.phone, "");
        assert_eq!(submission.priority, "medium");
        assert_eq!(submission.status, "new");
        assert_eq!(submission.created_at, submission.updated_at);
        assert!(submission.notification_message().contains("Phone: N/A\n"));
        assert_eq!(
            submission.notification_subject(),
            "New Contact Form Submission - Engines"
        );
    }
}
