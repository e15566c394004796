//! Email templates for onboarding.

use crate::dispatch::{Email, EmailKind};

/// Display name used when an invitation is not bound to a practice.
pub const PLATFORM_NAME: &str = "KinetoFlow Platform";

/// Subject line of the invitation email.
pub const INVITATION_SUBJECT: &str = "You're invited to join KinetoFlow";

/// Subject line of the welcome email.
pub const WELCOME_SUBJECT: &str = "Welcome to KinetoFlow";

/// Everything needed to render an invitation.
#[derive(Debug, Clone)]
pub struct InvitationTemplate<'a> {
    /// Invitee address
    pub recipient: &'a str,
    /// Display name of the person who sent the invite
    pub inviter_name: Option<&'a str>,
    /// Practice name; falls back to [`PLATFORM_NAME`]
    pub tenant_name: Option<&'a str>,
    /// Human readable role, e.g. "TENANT ADMIN"
    pub role_label: &'a str,
    /// Link to the acceptance page
    pub acceptance_url: &'a str,
    /// Token lifetime, for the expiry notice
    pub ttl_minutes: u64,
}

/// Render the invitation email.
pub fn invitation_email(template: &InvitationTemplate<'_>) -> Email {
    let inviter = template.inviter_name.unwrap_or("the KinetoFlow team");
    let tenant = template
        .tenant_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(PLATFORM_NAME);

    let body = format!(
        r#"Hello,

{inviter} has invited you to join {tenant} on KinetoFlow as a {role}.

Open the link below to accept the invitation and set up your account:
{url}

This link expires in {lifetime}.

If you were not expecting this invitation you can ignore this email.

The KinetoFlow Team
"#,
        inviter = inviter,
        tenant = tenant,
        role = template.role_label,
        url = template.acceptance_url,
        lifetime = describe_lifetime(template.ttl_minutes),
    );

    Email {
        to: template.recipient.to_string(),
        subject: INVITATION_SUBJECT.to_string(),
        body,
        kind: EmailKind::Invitation,
    }
}

/// Render the welcome email sent after an invitation is accepted.
pub fn welcome_email(recipient: &str, name: &str, login_url: &str) -> Email {
    let body = format!(
        r#"Hello {name},

Your KinetoFlow account is now active.

Sign in with your email address and the password you just chose:
{login_url}

The KinetoFlow Team
"#
    );

    Email {
        to: recipient.to_string(),
        subject: WELCOME_SUBJECT.to_string(),
        body,
        kind: EmailKind::Welcome,
    }
}

/// Human readable token lifetime ("24 hours", "90 minutes", "1 hour").
pub fn describe_lifetime(minutes: u64) -> String {
    if minutes >= 60 && minutes % 60 == 0 {
        let hours = minutes / 60;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{} hours", hours)
        }
    } else if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{} minutes", minutes)
    }
}
