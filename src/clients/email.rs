/*
 * This file is part of the Tanoda LMS.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::app::config::MailConfig;
use crate::breaker::CircuitBreaker;
use crate::clients::DependencyError;
use crate::common::{MailTransporter, TemplatedMailer};
use async_trait::async_trait;
use handlebars::Handlebars;
use lettre::{
    Message,
    address::AddressError,
    message::{Mailbox, header::ContentType},
};
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "email";

const ADMIN_NOTIFICATION_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Rendszerértesítés
</p>
<pre>{{payload}}</pre>
"##;

/// Templated email delivery over the shared SMTP transport.
///
/// Rendering happens with inline handlebars templates; the actual send goes
/// through the email circuit breaker with a delivery timeout, so a slow or
/// sick SMTP relay cannot stall a pipeline.
pub struct SmtpMailer {
    transporter: Arc<dyn MailTransporter>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    default_from: String,
    default_from_name: String,
    admin_notification_email: String,
}

impl SmtpMailer {
    pub fn new(
        config: &MailConfig,
        transporter: Arc<dyn MailTransporter>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            transporter,
            breaker,
            timeout: config.timeout(),
            default_from: config.default_from().to_string(),
            default_from_name: config.default_from_name().to_string(),
            admin_notification_email: config.admin_notification_email().to_string(),
        }
    }

    fn build_message(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<Message, DependencyError> {
        let handlebars = Handlebars::new();
        let body = handlebars
            .render_template(template, data)
            .map_err(|e| DependencyError::Transport {
                service: SERVICE,
                message: e.to_string(),
            })?;

        Message::builder()
            .from(Mailbox::new(
                Some(self.default_from_name.clone()),
                self.default_from
                    .parse()
                    .map_err(|e: AddressError| DependencyError::Transport {
                        service: SERVICE,
                        message: e.to_string(),
                    })?,
            ))
            .to(Mailbox::new(
                None,
                to.parse()
                    .map_err(|e: AddressError| DependencyError::Rejected {
                        service: SERVICE,
                        status: 0,
                        message: e.to_string(),
                    })?,
            ))
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|e| DependencyError::Transport {
                service: SERVICE,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl TemplatedMailer for SmtpMailer {
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), DependencyError> {
        let email = self.build_message(to, subject, template, data)?;

        self.breaker
            .execute(|| async {
                tokio::time::timeout(self.timeout, self.transporter.send(email))
                    .await
                    .map_err(|_| DependencyError::Timeout { service: SERVICE })?
                    .map_err(|e| DependencyError::Transport {
                        service: SERVICE,
                        message: e.to_string(),
                    })?;
                Ok(())
            })
            .await
            .map_err(DependencyError::from)
    }

    async fn send_admin_notification(
        &self,
        subject: &str,
        data: &serde_json::Value,
    ) -> Result<(), DependencyError> {
        let payload = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        self.send_templated(
            &self.admin_notification_email.clone(),
            subject,
            ADMIN_NOTIFICATION_TEMPLATE,
            &serde_json::json!({ "payload": payload }),
        )
        .await
    }
}
