//! Workflow run notifications
//!
//! Alert configuration is carried through the build and rendered into the
//! generated workflow as onsuccess/onerror blocks; the engine never sends
//! mail itself. Credentials may be left out of the build, in which case
//! the generated blocks read them from the pipeline's environment.

use serde_yaml::Value;

/// Environment variable consulted by generated blocks when no username is
/// configured
pub const EMAIL_USERNAME_VAR: &str = "TRELLIS_EMAIL_USERNAME";
/// Environment variable consulted by generated blocks when no password is
/// configured
pub const EMAIL_PASSWORD_VAR: &str = "TRELLIS_EMAIL_PASSWORD";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailSettings {
    pub smtp_address: String,
    pub smtp_port: u16,
    pub sender: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub recipients: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowAlerts {
    pub email_settings: EmailSettings,
    pub onsuccess: Option<Message>,
    pub onerror: Option<Message>,
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn message(value: &Value, key: &str) -> Option<Message> {
    let section = value.get(key)?;
    let msg = section.get("message")?;
    Some(Message {
        subject: text(msg, "subject"),
        body: text(msg, "body"),
        recipients: text(msg, "recipients"),
    })
}

/// Parse a raw alerts configuration mapping.
pub fn process_workflow_alerts(config: &Value) -> WorkflowAlerts {
    let email = config.get("email_settings");
    let email_settings = match email {
        Some(e) => EmailSettings {
            smtp_address: text(e, "smtp_server"),
            smtp_port: e
                .get("smtp_port")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u16,
            sender: text(e, "sender"),
            username: text(e, "username"),
            password: text(e, "password"),
        },
        None => EmailSettings::default(),
    };
    WorkflowAlerts {
        email_settings,
        onsuccess: message(config, "onsuccess"),
        onerror: message(config, "onerror"),
    }
}

impl WorkflowAlerts {
    /// Blocks are only rendered for a fully specified configuration:
    /// server address, port, and recipients on each present message.
    /// Credentials fall back to environment lookups at pipeline runtime.
    pub fn is_renderable(&self) -> bool {
        if self.email_settings.smtp_address.is_empty() || self.email_settings.smtp_port == 0 {
            return false;
        }
        let has_message = |m: &Option<Message>| {
            m.as_ref().is_some_and(|m| !m.recipients.is_empty())
        };
        has_message(&self.onsuccess) || has_message(&self.onerror)
    }

    /// Render the onsuccess/onerror blocks appended to the generated
    /// workflow.
    pub fn render_blocks(&self) -> String {
        if !self.is_renderable() {
            return String::new();
        }
        let settings = &self.email_settings;
        let username = if settings.username.is_empty() {
            format!("os.environ.get('{EMAIL_USERNAME_VAR}')")
        } else {
            format!("\"{}\"", settings.username)
        };
        let password = if settings.username.is_empty() || settings.password.is_empty() {
            format!("os.environ.get('{EMAIL_PASSWORD_VAR}')")
        } else {
            format!("\"{}\"", settings.password)
        };
        let sender = if settings.sender.is_empty() {
            username.clone()
        } else {
            format!("\"{}\"", settings.sender)
        };

        let mut s = String::new();
        if let Some(msg) = &self.onsuccess {
            if !msg.recipients.is_empty() {
                s.push_str(&self.render_block("onsuccess", msg, &username, &password, &sender));
            }
        }
        if let Some(msg) = &self.onerror {
            if !msg.recipients.is_empty() {
                s.push_str(&self.render_block("onerror", msg, &username, &password, &sender));
            }
        }
        s
    }

    fn render_block(
        &self,
        directive: &str,
        message: &Message,
        username: &str,
        password: &str,
        sender: &str,
    ) -> String {
        let settings = &self.email_settings;
        let mut s = String::from("\n");
        s.push_str(&format!("{directive}:\n"));
        // the notification must never fail the run itself
        s.push_str("    try:\n");
        s.push_str("        import sendmail\n");
        s.push_str("        sendmail.send_email(\n");
        s.push_str(&format!(
            "            server_address=\"{}\",\n",
            settings.smtp_address
        ));
        s.push_str(&format!(
            "            server_port=\"{}\",\n",
            settings.smtp_port
        ));
        s.push_str(&format!("            subject=\"{}\",\n", message.subject));
        s.push_str(&format!("            body=\"{}\",\n", message.body));
        // sender/credentials stay unquoted so environment lookups survive
        s.push_str(&format!("            sender={sender},\n"));
        s.push_str(&format!(
            "            recipients=\"{}\",\n",
            message.recipients
        ));
        s.push_str(&format!("            username={username},\n"));
        s.push_str(&format!("            password={password},\n"));
        s.push_str("        )\n");
        s.push_str("    except Exception as e:\n");
        s.push_str("        print(\"Error sending email: \", e)\n");
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> Value {
        serde_yaml::from_str(
            r#"
email_settings:
  smtp_server: smtp.example.org
  smtp_port: 587
  username: pipeline
  password: hunter2
onsuccess:
  message:
    subject: Run complete
    body: All rules finished
    recipients: team@example.org
onerror:
  message:
    subject: Run failed
    body: See the log
    recipients: team@example.org
"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_full_configuration() {
        let alerts = process_workflow_alerts(&full_config());
        assert_eq!(alerts.email_settings.smtp_address, "smtp.example.org");
        assert_eq!(alerts.email_settings.smtp_port, 587);
        assert_eq!(alerts.onsuccess.as_ref().unwrap().subject, "Run complete");
        assert_eq!(alerts.onerror.as_ref().unwrap().recipients, "team@example.org");
        assert!(alerts.is_renderable());
    }

    #[test]
    fn renders_both_directives_with_quoted_credentials() {
        let alerts = process_workflow_alerts(&full_config());
        let blocks = alerts.render_blocks();
        assert!(blocks.contains("onsuccess:"));
        assert!(blocks.contains("onerror:"));
        assert!(blocks.contains("username=\"pipeline\""));
        assert!(blocks.contains("password=\"hunter2\""));
        assert!(blocks.contains("sender=\"pipeline\"") || blocks.contains("sender=username"));
    }

    #[test]
    fn missing_credentials_fall_back_to_environment() {
        let mut alerts = process_workflow_alerts(&full_config());
        alerts.email_settings.username = String::new();
        alerts.email_settings.password = String::new();
        let blocks = alerts.render_blocks();
        assert!(blocks.contains(&format!("os.environ.get('{EMAIL_USERNAME_VAR}')")));
        assert!(blocks.contains(&format!("os.environ.get('{EMAIL_PASSWORD_VAR}')")));
    }

    #[test]
    fn incomplete_settings_render_nothing() {
        let alerts = process_workflow_alerts(&Value::Null);
        assert!(!alerts.is_renderable());
        assert!(alerts.render_blocks().is_empty());

        let mut alerts = process_workflow_alerts(&full_config());
        alerts.email_settings.smtp_port = 0;
        assert!(alerts.render_blocks().is_empty());
    }
}
