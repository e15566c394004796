//! Token-based onboarding.
//!
//! Inviting someone creates (or reuses) an inactive account bound to a role and
//! company and carrying a random token. Accepting the token activates the
//! account. Emails are rendered here and handed back to the caller for
//! dispatch once the transaction has committed.

use chrono::{DateTime, Utc};
use kinetoflow_mail::{invitation_email, welcome_email, Email, InvitationTemplate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::{random_token, require_assigned_medic, visible, Actor, PasswordHasher};
use crate::config::Settings;
use crate::db::Database;
use crate::error::{ClinicError, ClinicResult, Violations};
use crate::models::{Role, User};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationRequest {
    pub email: String,
    pub role: Role,
    /// Only honoured for platform admins; everybody else invites into their own company
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub name: String,
    pub password: String,
}

/// What the acceptance page shows before the invitee signs up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationDetails {
    pub email: String,
    pub role: Role,
    pub tenant_name: Option<String>,
    pub inviter_name: Option<String>,
}

fn normalize_email(email: &str) -> ClinicResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(ClinicError::invalid("email", "A valid email address is required"))
    }
}

pub struct Invitations<'a> {
    db: &'a Database,
    settings: &'a Settings,
    hasher: &'a dyn PasswordHasher,
}

impl<'a> Invitations<'a> {
    pub fn new(db: &'a Database, settings: &'a Settings, hasher: &'a dyn PasswordHasher) -> Self {
        Self {
            db,
            settings,
            hasher,
        }
    }

    /// Work out the company and assigned medic an invite from `actor` binds to.
    fn binding(&self, actor: &Actor, req: &InvitationRequest) -> ClinicResult<(Option<String>, Option<String>)> {
        if req.role == Role::PlatformAdmin {
            return Err(ClinicError::bad_request(
                "Platform administrators cannot be invited.",
            ));
        }

        match actor.role {
            Role::Medic => {
                if req.role != Role::Patient {
                    return Err(ClinicError::bad_request("Medics can only invite patients."));
                }
                Ok((Some(actor.tenant()?.to_string()), Some(actor.id.clone())))
            }
            Role::TenantAdmin => {
                if !matches!(req.role, Role::Medic | Role::TenantAdmin) {
                    return Err(ClinicError::bad_request(
                        "Company admins can only invite medics and company admins.",
                    ));
                }
                Ok((Some(actor.tenant()?.to_string()), None))
            }
            Role::PlatformAdmin => {
                if !matches!(req.role, Role::Medic | Role::TenantAdmin) {
                    return Err(ClinicError::bad_request(
                        "Platform admins can only invite medics and company admins.",
                    ));
                }
                match req.tenant_id.as_deref().filter(|t| !t.trim().is_empty()) {
                    Some(tenant_id) => {
                        let company = self
                            .db
                            .get_company(tenant_id)?
                            .ok_or_else(|| ClinicError::not_found("Company"))?;
                        Ok((Some(company.id), None))
                    }
                    None if req.role == Role::TenantAdmin => Ok((None, None)),
                    None => Err(ClinicError::invalid(
                        "tenant_id",
                        "A company is required for this role",
                    )),
                }
            }
            Role::Patient => Err(ClinicError::forbidden("Access denied for this role")),
        }
    }

    /// Invite someone, or re-issue the token of a pending invitee.
    ///
    /// Returns the pending user and the rendered invitation email.
    pub fn send_invitation(
        &self,
        actor: &Actor,
        req: InvitationRequest,
        now: DateTime<Utc>,
    ) -> ClinicResult<(User, Email)> {
        let email = normalize_email(&req.email)?;
        let (tenant_id, assigned_medic_id) = self.binding(actor, &req)?;

        let token = random_token();
        let expiry = now + self.settings.invitation_ttl();

        let user = match self.db.get_user_by_email(&email)? {
            Some(existing) if existing.active => {
                return Err(ClinicError::bad_request(
                    "A user with this email already exists.",
                ));
            }
            Some(mut pending) => {
                pending.role = req.role;
                pending.tenant_id = tenant_id;
                pending.assigned_medic_id = assigned_medic_id;
                pending.invitation_token = Some(token.clone());
                pending.invitation_expiry = Some(expiry);
                pending.updated_at = now;
                self.db.update_user(&pending)?;
                info!(user_id = %pending.id, role = %pending.role, "Invitation re-issued");
                pending
            }
            None => {
                let placeholder = self.hasher.hash(&random_token());
                let mut user = User::new_invited(email.clone(), req.role, tenant_id, placeholder, now);
                user.assigned_medic_id = assigned_medic_id;
                user.invitation_token = Some(token.clone());
                user.invitation_expiry = Some(expiry);
                self.db.insert_user(&user)?;
                info!(user_id = %user.id, role = %user.role, "Invitation created");
                user
            }
        };

        let tenant_name = match user.tenant_id.as_deref() {
            Some(id) => self.db.get_company(id)?.map(|c| c.name),
            None => None,
        };
        let role_label = user.role.label();
        let url = self.settings.acceptance_url(&token);
        let message = invitation_email(&InvitationTemplate {
            recipient: &user.email,
            inviter_name: Some(&actor.name),
            tenant_name: tenant_name.as_deref(),
            role_label: &role_label,
            acceptance_url: &url,
            ttl_minutes: self.settings.invitation.token.ttl_minutes,
        });
        Ok((user, message))
    }

    /// Same as [`send_invitation`](Self::send_invitation); issues a fresh token.
    pub fn resend_invitation(
        &self,
        actor: &Actor,
        req: InvitationRequest,
        now: DateTime<Utc>,
    ) -> ClinicResult<(User, Email)> {
        self.send_invitation(actor, req, now)
    }

    fn pending_by_token(&self, token: &str, now: DateTime<Utc>) -> ClinicResult<User> {
        let user = self
            .db
            .get_user_by_invitation_token(token)?
            .ok_or_else(|| ClinicError::not_found("Invitation"))?;
        if user.active {
            return Err(ClinicError::bad_request("Invitation has already been accepted."));
        }
        if !user.invitation_valid_at(now) {
            warn!(user_id = %user.id, "Expired invitation token used");
            return Err(ClinicError::bad_request("Invitation has expired."));
        }
        Ok(user)
    }

    /// Public lookup of a pending invitation.
    pub fn lookup_invitation(&self, token: &str, now: DateTime<Utc>) -> ClinicResult<InvitationDetails> {
        let user = self.pending_by_token(token, now)?;
        let tenant_name = match user.tenant_id.as_deref() {
            Some(id) => self.db.get_company(id)?.map(|c| c.name),
            None => None,
        };
        let inviter_name = match user.assigned_medic_id.as_deref() {
            Some(id) => self.db.get_user(id)?.map(|m| m.name),
            None => None,
        };
        Ok(InvitationDetails {
            email: user.email,
            role: user.role,
            tenant_name,
            inviter_name,
        })
    }

    /// Activate the account behind `token`. Returns the user and the welcome email.
    pub fn accept_invitation(
        &self,
        req: AcceptInvitationRequest,
        now: DateTime<Utc>,
    ) -> ClinicResult<(User, Email)> {
        let name = req.name.trim();
        let mut v = Violations::new();
        v.check(name.is_empty(), "name", "Name is required")
            .check(
                req.password.chars().count() < MIN_PASSWORD_LEN,
                "password",
                "Password must be at least 8 characters",
            );
        v.into_result()?;

        let mut user = self.pending_by_token(&req.token, now)?;
        user.name = name.to_string();
        user.password_hash = self.hasher.hash(&req.password);
        user.active = true;
        user.clear_invitation();
        user.updated_at = now;
        self.db.update_user(&user)?;

        info!(user_id = %user.id, role = %user.role, "Invitation accepted");
        let message = welcome_email(&user.email, &user.name, &self.settings.login_url());
        Ok((user, message))
    }

    /// Withdraw a pending patient invitation. The record stays and can be
    /// invited again.
    pub fn cancel_invitation(&self, actor: &Actor, user_id: &str, now: DateTime<Utc>) -> ClinicResult<()> {
        actor.require_role(&[Role::Medic])?;
        actor.tenant()?;
        let user = visible(actor, self.db.get_user(user_id)?, "User")?;
        if user.role != Role::Patient {
            return Err(ClinicError::bad_request("Only patient invitations can be cancelled."));
        }
        require_assigned_medic(actor, &user)?;
        if user.active {
            return Err(ClinicError::bad_request("User has already accepted the invitation."));
        }
        if !user.has_pending_invitation() {
            return Err(ClinicError::bad_request("No pending invitation for this user."));
        }

        self.db.clear_invitation(&user.id, now)?;
        info!(user_id = %user.id, medic_id = %actor.id, "Invitation cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SaltedSha256Hasher;
    use crate::models::Company;
    use chrono::{Duration, TimeZone};
    use kinetoflow_mail::EmailKind;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    struct Fixture {
        db: Database,
        settings: Settings,
        company: Company,
        medic: Actor,
        admin: Actor,
        root: Actor,
    }

    fn setup_db() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let company = Company::new("Kineto".into(), None, now());
        db.insert_company(&company).unwrap();

        let mut medic = User::new_invited("m@x.org".into(), Role::Medic, Some(company.id.clone()), "h".into(), now());
        medic.active = true;
        medic.name = "Dr. Ana".into();
        db.insert_user(&medic).unwrap();

        let admin = Actor {
            id: "admin".into(),
            name: "Admin".into(),
            email: "a@x.org".into(),
            role: Role::TenantAdmin,
            tenant_id: Some(company.id.clone()),
        };
        let root = Actor {
            id: "root".into(),
            name: "Root".into(),
            email: "root@x.org".into(),
            role: Role::PlatformAdmin,
            tenant_id: None,
        };
        Fixture {
            db,
            settings: Settings::default(),
            medic: Actor::from(&medic),
            company,
            admin,
            root,
        }
    }

    fn invite(email: &str, role: Role) -> InvitationRequest {
        InvitationRequest {
            email: email.into(),
            role,
            tenant_id: None,
        }
    }

    #[test]
    fn test_medic_invites_patient() {
        let f = setup_db();
        let inv = Invitations::new(&f.db, &f.settings, &SaltedSha256Hasher);
        let (user, email) = inv
            .send_invitation(&f.medic, invite(" A@X.org ", Role::Patient), now())
            .unwrap();

        assert_eq!(user.email, "a@x.org");
        assert_eq!(user.tenant_id.as_deref(), Some(f.company.id.as_str()));
        assert_eq!(user.assigned_medic_id.as_deref(), Some(f.medic.id.as_str()));
        assert!(!user.active);
        assert_eq!(user.invitation_expiry, Some(now() + Duration::minutes(1440)));

        assert_eq!(email.kind, EmailKind::Invitation);
        assert_eq!(email.to, "a@x.org");
        assert!(email.body.contains("Dr. Ana"));
        assert!(email.body.contains("Kineto"));
        let token = user.invitation_token.unwrap();
        assert!(email.body.contains(&format!("/accept-invitation/{}", token)));
    }

    #[test]
    fn test_role_rules() {
        let f = setup_db();
        let inv = Invitations::new(&f.db, &f.settings, &SaltedSha256Hasher);

        for (actor, role) in [
            (&f.medic, Role::Medic),
            (&f.admin, Role::Patient),
            (&f.root, Role::Patient),
            (&f.root, Role::PlatformAdmin),
        ] {
            let err = inv.send_invitation(actor, invite("x@x.org", role), now()).unwrap_err();
            assert_eq!(err.kind(), "BAD_REQUEST", "{:?} inviting {:?}", actor.role, role);
        }

        // Platform admin needs a company for medics, not for tenant admins
        assert_eq!(
            inv.send_invitation(&f.root, invite("x@x.org", Role::Medic), now())
                .unwrap_err()
                .kind(),
            "VALIDATION"
        );
        let (owner, _) = inv
            .send_invitation(&f.root, invite("owner@x.org", Role::TenantAdmin), now())
            .unwrap();
        assert!(owner.tenant_id.is_none());

        let mut req = invite("medic2@x.org", Role::Medic);
        req.tenant_id = Some(f.company.id.clone());
        let (medic, _) = inv.send_invitation(&f.root, req, now()).unwrap();
        assert_eq!(medic.tenant_id, Some(f.company.id.clone()));
    }

    #[test]
    fn test_existing_active_user_rejected_pending_reused() {
        let f = setup_db();
        let inv = Invitations::new(&f.db, &f.settings, &SaltedSha256Hasher);

        assert_eq!(
            inv.send_invitation(&f.admin, invite("m@x.org", Role::Medic), now())
                .unwrap_err(),
            ClinicError::bad_request("A user with this email already exists.")
        );

        let (first, _) = inv.send_invitation(&f.medic, invite("p@x.org", Role::Patient), now()).unwrap();
        let (second, _) = inv.resend_invitation(&f.medic, invite("p@x.org", Role::Patient), now()).unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.invitation_token, second.invitation_token);
    }

    #[test]
    fn test_accept_flow() {
        let f = setup_db();
        let hasher = SaltedSha256Hasher;
        let inv = Invitations::new(&f.db, &f.settings, &hasher);
        let (user, _) = inv.send_invitation(&f.medic, invite("a@x.org", Role::Patient), now()).unwrap();
        let token = user.invitation_token.unwrap();

        let details = inv.lookup_invitation(&token, now()).unwrap();
        assert_eq!(details.tenant_name.as_deref(), Some("Kineto"));
        assert_eq!(details.inviter_name.as_deref(), Some("Dr. Ana"));

        let short = AcceptInvitationRequest {
            token: token.clone(),
            name: "Alice".into(),
            password: "1234567".into(),
        };
        assert_eq!(inv.accept_invitation(short, now()).unwrap_err().kind(), "VALIDATION");

        let req = AcceptInvitationRequest {
            token: token.clone(),
            name: " Alice ".into(),
            password: "12345678".into(),
        };
        let (active, welcome) = inv.accept_invitation(req, now()).unwrap();
        assert!(active.active);
        assert_eq!(active.name, "Alice");
        assert!(active.invitation_token.is_none());
        assert!(hasher.verify("12345678", &active.password_hash));
        assert_eq!(welcome.kind, EmailKind::Welcome);

        assert_eq!(
            inv.lookup_invitation(&token, now()),
            Err(ClinicError::not_found("Invitation"))
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let f = setup_db();
        let inv = Invitations::new(&f.db, &f.settings, &SaltedSha256Hasher);
        let (user, _) = inv.send_invitation(&f.medic, invite("a@x.org", Role::Patient), now()).unwrap();

        let later = now() + Duration::minutes(1440);
        let req = AcceptInvitationRequest {
            token: user.invitation_token.unwrap(),
            name: "Alice".into(),
            password: "12345678".into(),
        };
        assert_eq!(
            inv.accept_invitation(req, later),
            Err(ClinicError::bad_request("Invitation has expired."))
        );
    }

    #[test]
    fn test_cancel_then_reinvite() {
        let f = setup_db();
        let inv = Invitations::new(&f.db, &f.settings, &SaltedSha256Hasher);
        let (user, _) = inv.send_invitation(&f.medic, invite("a@x.org", Role::Patient), now()).unwrap();

        inv.cancel_invitation(&f.medic, &user.id, now()).unwrap();
        let stored = f.db.get_user(&user.id).unwrap().unwrap();
        assert!(stored.invitation_token.is_none());
        assert_eq!(
            inv.cancel_invitation(&f.medic, &user.id, now()),
            Err(ClinicError::bad_request("No pending invitation for this user."))
        );

        let (again, _) = inv.send_invitation(&f.medic, invite("a@x.org", Role::Patient), now()).unwrap();
        assert_eq!(again.id, user.id);
        assert!(again.invitation_token.is_some());
    }
}
