use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::{Post, User},
};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Notifier
///
/// Outbound notifications. Callers spawn these and only log failures; a notification
/// never changes the outcome of the request that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tells `recipient` that `post` was published.
    async fn new_post(&self, recipient: &User, post: &Post) -> AppResult<()>;
    /// Tells the site admin that `member` registered.
    async fn new_member(&self, member: &User) -> AppResult<()>;
}

pub type NotifierState = Arc<dyn Notifier>;

/// Email
///
/// Provider-independent message.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub plain_text: String,
    pub html: Option<String>,
}

/// EmailNotifier
///
/// Composes notification emails and sends them through SendGrid. Without an API key the
/// messages are only logged, which is what local development runs with.
pub struct EmailNotifier {
    http: reqwest::Client,
    api_key: Option<String>,
    from_email: String,
    from_name: String,
    admin_email: String,
    site_url: String,
}

impl EmailNotifier {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.sendgrid_api_key.clone(),
            from_email: config.notify_from_email.clone(),
            from_name: config.notify_from_name.clone(),
            admin_email: config.admin_contact_email.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn new_post_email(&self, recipient: &User, post: &Post) -> Email {
        Email {
            to_name: format!("{} {}", recipient.first_name, recipient.last_name),
            to_email: recipient.email.clone(),
            subject: format!("New post on {}", self.site_host()),
            plain_text: format!("Read the new post: {}", post.title),
            html: Some(format!(
                "Hey {}, there is a new post on {}. Check out <a href=\"{}/signin\">{}</a>",
                recipient.first_name,
                self.site_host(),
                self.site_url,
                post.title
            )),
        }
    }

    pub fn new_member_email(&self, member: &User) -> Email {
        Email {
            to_name: self.from_name.clone(),
            to_email: self.admin_email.clone(),
            subject: format!("A new member has joined {}", self.site_host()),
            plain_text: format!(
                "{} {} ({}) has created an account on {}",
                member.first_name,
                member.last_name,
                member.email,
                self.site_host()
            ),
            html: None,
        }
    }

    fn site_host(&self) -> &str {
        self.site_url
            .split_once("://")
            .map(|(_, host)| host)
            .unwrap_or(&self.site_url)
    }

    async fn deliver(&self, email: Email) -> AppResult<()> {
        let Some(api_key) = &self.api_key else {
            tracing::info!(to = %email.to_email, subject = %email.subject, "email (not sent, no provider configured)");
            return Ok(());
        };

        let mut content = vec![json!({ "type": "text/plain", "value": email.plain_text })];
        if let Some(html) = &email.html {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        let body = json!({
            "personalizations": [{ "to": [{ "email": email.to_email, "name": email.to_name }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": email.subject,
            "content": content,
        });

        let response = self
            .http
            .post(SENDGRID_SEND_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "email provider returned {}: {}",
                status, detail
            )));
        }

        tracing::debug!(to = %email.to_email, "email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn new_post(&self, recipient: &User, post: &Post) -> AppResult<()> {
        self.deliver(self.new_post_email(recipient, post)).await
    }

    async fn new_member(&self, member: &User) -> AppResult<()> {
        self.deliver(self.new_member_email(member)).await
    }
}

/// notify_subscribers
///
/// Fires a new-post email at every subscriber allowed to read `post`. Returns immediately;
/// each send runs on its own task.
pub fn notify_subscribers(notifier: NotifierState, subscribers: Vec<User>, post: Post) {
    let post = Arc::new(post);
    for user in subscribers
        .into_iter()
        .filter(|u| u.email_notification && (!post.restricted || u.role.can_read_restricted()))
    {
        let notifier = notifier.clone();
        let post = post.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.new_post(&user, &post).await {
                tracing::warn!(user_id = user.id, "new post notification failed: {}", e);
            }
        });
    }
}

/// Fires the admin new-member email in the background.
pub fn notify_new_member(notifier: NotifierState, member: User) {
    tokio::spawn(async move {
        if let Err(e) = notifier.new_member(&member).await {
            tracing::warn!(user_id = member.id, "new member notification failed: {}", e);
        }
    });
}
