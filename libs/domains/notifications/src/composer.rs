//! Builds localized messages out of templates and variables.

use crate::error::{NotificationError, NotificationResult};
use crate::l10n;
use crate::models::{Message, Recipient};
use crate::templates::phrases::GROUPED;
use crate::templates::{
    BodyParts, Template, TemplateEngine, TemplateVars, call_to_action_link, newlines_to_br,
};
use tracing::{debug, warn};

/// Variables that always carry the recipient's display name.
const RECIPIENT_VARS: [&str; 3] = ["ShareGrantee", "SpaceGrantee", "DisplayName"];

const TEXT_FRAGMENT_SEPARATOR: &str = "\n\n\n";
const HTML_FRAGMENT_SEPARATOR: &str = "<br><br><br>";

/// One event mapped to a template and the values for its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub template: Template,
    pub vars: TemplateVars,
    /// Display name used as sender of an instant message.
    pub sender: String,
}

impl Notification {
    pub fn new(template: Template, vars: TemplateVars, sender: impl Into<String>) -> Self {
        Self {
            template,
            vars,
            sender: sender.into(),
        }
    }
}

/// Renders single and grouped messages.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    engine: TemplateEngine,
    digest_sender: String,
}

impl MessageComposer {
    /// `digest_sender` is the sender of grouped digests.
    pub fn new(engine: TemplateEngine, digest_sender: impl Into<String>) -> Self {
        Self {
            engine,
            digest_sender: digest_sender.into(),
        }
    }

    /// Render one notification for one recipient.
    pub fn compose(
        &self,
        notification: &Notification,
        locale: &str,
        recipient: &Recipient,
    ) -> NotificationResult<Message> {
        let template = &notification.template;
        let vars = with_recipient(&notification.vars, recipient);

        let subject = self.engine.render_text(l10n::translate(locale, template.subject), &vars)?;
        let greeting = l10n::translate(locale, template.greeting);
        let message = l10n::translate(locale, template.message);
        let call_to_action = l10n::translate(locale, template.call_to_action);

        let text = BodyParts {
            greeting: self.engine.render_text(greeting, &vars)?,
            message: self.engine.render_text(message, &vars)?,
            call_to_action: self.engine.render_text(call_to_action, &vars)?,
        };
        let html = BodyParts {
            greeting: self.engine.render_html(greeting, &vars)?,
            message: newlines_to_br(&self.engine.render_html(message, &vars)?),
            call_to_action: self
                .engine
                .render_html(&call_to_action_link(call_to_action), &vars)?,
        };

        debug!(template = template.name, locale = %locale, "Composed message");
        Ok(Message {
            sender: notification.sender.clone(),
            recipients: vec![recipient.mail.clone()],
            subject,
            text_body: self.engine.text_body(&text)?,
            html_body: self.engine.html_body(&html)?,
            attachments: Vec::new(),
        })
    }

    /// Render one digest out of several notifications for the same user.
    ///
    /// Each notification contributes its message as one fragment. Fragments
    /// that fail to render are skipped; without a single fragment the digest
    /// fails with [`NotificationError::EmptyDigest`].
    pub fn compose_grouped(
        &self,
        notifications: &[Notification],
        locale: &str,
        user: &Recipient,
    ) -> NotificationResult<Message> {
        let mut text_fragments = Vec::with_capacity(notifications.len());
        let mut html_fragments = Vec::with_capacity(notifications.len());

        for notification in notifications {
            let vars = with_recipient(&notification.vars, user);
            let phrase = l10n::translate(locale, notification.template.message);
            let rendered = self.engine.render_text(phrase, &vars).and_then(|text| {
                let html = self.engine.render_html(phrase, &vars)?;
                Ok((text, newlines_to_br(&html)))
            });
            match rendered {
                Ok((text, _)) if text.is_empty() => {
                    warn!(template = notification.template.name, "Empty fragment, skipping");
                }
                Ok((text, html)) => {
                    text_fragments.push(text);
                    html_fragments.push(html);
                }
                Err(e) => {
                    warn!(
                        template = notification.template.name,
                        user_id = %user.opaque_id,
                        error = %e,
                        "Failed to render digest fragment, skipping"
                    );
                }
            }
        }

        if text_fragments.is_empty() {
            return Err(NotificationError::EmptyDigest(user.opaque_id.clone()));
        }

        let vars = with_recipient(&TemplateVars::new(), user);
        let greeting = l10n::translate(locale, GROUPED.greeting);
        let text = BodyParts {
            greeting: self.engine.render_text(greeting, &vars)?,
            message: text_fragments.join(TEXT_FRAGMENT_SEPARATOR),
            call_to_action: String::new(),
        };
        let html = BodyParts {
            greeting: self.engine.render_html(greeting, &vars)?,
            message: html_fragments.join(HTML_FRAGMENT_SEPARATOR),
            call_to_action: String::new(),
        };

        debug!(
            user_id = %user.opaque_id,
            fragments = text_fragments.len(),
            "Composed digest"
        );
        Ok(Message {
            sender: self.digest_sender.clone(),
            recipients: vec![user.mail.clone()],
            subject: self
                .engine
                .render_text(l10n::translate(locale, GROUPED.subject), &vars)?,
            text_body: self.engine.text_body(&text)?,
            html_body: self.engine.html_body(&html)?,
            attachments: Vec::new(),
        })
    }
}

fn with_recipient(vars: &TemplateVars, recipient: &Recipient) -> TemplateVars {
    let mut vars = vars.clone();
    for key in RECIPIENT_VARS {
        vars.entry(key.to_string())
            .or_insert_with(|| recipient.display_name.clone());
    }
    vars
}
