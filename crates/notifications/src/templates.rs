use super::NewNotification;
use anyhow::Context;
use models::{ApplicationStatus, Internship, NotificationKind};
use serde_json::json;

/// Maximum number of characters of an SMS text.
pub const SMS_MAX_CHARS: usize = 300;

/// Templates renders the text of notifications sent by the platform.
pub struct Templates {
    registry: handlebars::Handlebars<'static>,
}

impl Templates {
    pub fn new() -> anyhow::Result<Self> {
        let mut registry = handlebars::Handlebars::new();
        registry.set_strict_mode(true);
        // Rendered text is sent as push messages and SMS, never as HTML.
        registry.register_escape_fn(handlebars::no_escape);
        register_templates(&mut registry)?;

        Ok(Self { registry })
    }

    /// Notification of a student whose application was accepted or rejected.
    pub fn application_decided(
        &self,
        internship: &Internship,
        status: ApplicationStatus,
    ) -> anyhow::Result<NewNotification> {
        let status_name: &'static str = status.into();
        let args = json!({
            "title": internship.title,
            "company": internship.company,
            "accepted": status == ApplicationStatus::Accepted,
            "status": status_name,
        });

        Ok(NewNotification::new(
            NotificationKind::Application,
            self.render("application-decided-title", &args)?,
            self.render("application-decided-message", &args)?,
        )
        .with_link("/student/applications"))
    }

    /// Notification of students that a new offer was published.
    pub fn internship_published(&self, internship: &Internship) -> anyhow::Result<NewNotification> {
        let args = json!({
            "title": internship.title,
            "company": internship.company,
            "location": internship.location,
            "startDate": internship.start_date.format("%d/%m/%Y").to_string(),
        });

        Ok(NewNotification::new(
            NotificationKind::Internship,
            self.render("internship-published-title", &args)?,
            self.render("internship-published-message", &args)?,
        )
        .with_link(format!("/student/internships/{}", internship.id)))
    }

    /// Text of the SMS escalating a notification, at most
    /// SMS_MAX_CHARS characters long.
    pub fn sms_text(&self, title: &str, message: &str) -> anyhow::Result<String> {
        let text = self.render(
            "sms-escalation",
            &json!({"title": title.trim(), "message": message.trim()}),
        )?;
        Ok(truncate_chars(&text, SMS_MAX_CHARS))
    }

    fn render(&self, name: &str, args: &serde_json::Value) -> anyhow::Result<String> {
        self.registry
            .render(name, args)
            .with_context(|| format!("rendering {name} template"))
    }
}

fn register_templates(registry: &mut handlebars::Handlebars<'_>) -> anyhow::Result<()> {
    registry
        .register_template_string(
            "application-decided-title",
            r#"{{#if accepted}}Candidature acceptée{{else}}Candidature refusée{{/if}}"#,
        )
        .context("registering application-decided-title template")?;

    registry
        .register_template_string(
            "application-decided-message",
            r#"{{#if accepted ~}}
Bonne nouvelle ! Votre candidature au stage « {{title}} » chez {{company}} a été acceptée.
{{~else~}}
Votre candidature au stage « {{title}} » chez {{company}} n'a pas été retenue.
{{~/if}}"#,
        )
        .context("registering application-decided-message template")?;

    registry
        .register_template_string(
            "internship-published-title",
            r#"Nouvelle offre de stage : {{title}}"#,
        )
        .context("registering internship-published-title template")?;

    registry
        .register_template_string(
            "internship-published-message",
            r#"{{company}} propose un stage « {{title}} » à {{location}} à partir du {{startDate}}."#,
        )
        .context("registering internship-published-message template")?;

    registry
        .register_template_string("sms-escalation", r#"{{title}}: {{message}}"#)
        .context("registering sms-escalation template")?;

    Ok(())
}

/// Truncate `text` to at most `max` characters, marking truncation with an ellipsis.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;

    fn internship() -> Internship {
        Internship {
            id: uuid::Uuid::nil(),
            title: "Développeur Rust".to_string(),
            company: "Acme & Fils".to_string(),
            location: "Lyon".to_string(),
            description: "Backend".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            end_date: None,
            contact_email: None,
            published: true,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_application_decided() {
        let templates = Templates::new().unwrap();

        let accepted = templates
            .application_decided(&internship(), ApplicationStatus::Accepted)
            .unwrap();
        assert_eq!(
            accepted,
            NewNotification {
                title: "Candidature acceptée".to_string(),
                message: "Bonne nouvelle ! Votre candidature au stage « Développeur Rust » chez Acme & Fils a été acceptée.".to_string(),
                kind: NotificationKind::Application,
                link: Some("/student/applications".to_string()),
            }
        );

        let rejected = templates
            .application_decided(&internship(), ApplicationStatus::Rejected)
            .unwrap();
        assert_eq!(rejected.title, "Candidature refusée");
        assert_eq!(
            rejected.message,
            "Votre candidature au stage « Développeur Rust » chez Acme & Fils n'a pas été retenue."
        );
    }

    #[test]
    fn test_internship_published() {
        let n = Templates::new()
            .unwrap()
            .internship_published(&internship())
            .unwrap();

        assert_eq!(n.title, "Nouvelle offre de stage : Développeur Rust");
        assert_eq!(
            n.message,
            "Acme & Fils propose un stage « Développeur Rust » à Lyon à partir du 02/03/2026."
        );
        assert_eq!(
            n.link.as_deref(),
            Some("/student/internships/00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn test_sms_text_truncation() {
        let templates = Templates::new().unwrap();

        assert_eq!(
            templates.sms_text(" Rappel ", "Entretien demain <10h>").unwrap(),
            "Rappel: Entretien demain <10h>"
        );

        let long = "é".repeat(400);
        let text = templates.sms_text("Titre", &long).unwrap();
        assert_eq!(text.chars().count(), SMS_MAX_CHARS);
        assert!(text.starts_with("Titre: éé"));
        assert!(text.ends_with("é…"));

        let exact = "x".repeat(SMS_MAX_CHARS - "T: ".len());
        assert_eq!(
            templates.sms_text("T", &exact).unwrap(),
            format!("T: {exact}")
        );
    }
}
