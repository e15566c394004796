//! Shared fixture: one company onboarded end to end through invitations.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use kinetoflow_core::{
    AcceptInvitationRequest, Actor, Clinic, CompanyRequest, FixedClock, InvitationRequest, Role,
    ServiceRequest, Settings, User,
};
use kinetoflow_mail::{Email, Notifier};
use tokio::sync::mpsc::UnboundedReceiver;

pub const PASSWORD: &str = "correct-horse";

/// Monday 2 March 2026, at `hour:minute` UTC.
pub fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

pub fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.jwt.secret = "integration-secret-integration-secret".into();
    settings.frontend.base_url = "https://app.test".into();
    settings
}

pub struct World {
    pub clinic: Clinic,
    pub clock: Arc<FixedClock>,
    pub outbox: UnboundedReceiver<Email>,
    pub root: Actor,
    pub tenant_id: String,
    pub admin: Actor,
    pub medic: Actor,
    pub patient: Actor,
}

impl World {
    /// Platform admin, company "Kineto", a tenant admin, a medic and their patient.
    /// The clock starts at Monday 08:00.
    pub fn new() -> Self {
        let clock = Arc::new(FixedClock::new(monday(8, 0)));
        let (notifier, outbox) = Notifier::channel();
        let clinic = Clinic::in_memory(settings(), notifier)
            .unwrap()
            .with_clock(clock.clone());

        let root = Actor::from(
            &clinic
                .create_platform_admin("Root", "root@kineto.test", PASSWORD)
                .unwrap(),
        );
        let company = clinic
            .create_company(
                &root,
                CompanyRequest {
                    name: "Kineto".into(),
                    address: Some("Str. Lunga 1".into()),
                },
            )
            .unwrap();

        let mut world = Self {
            clinic,
            clock,
            outbox,
            tenant_id: company.id.clone(),
            admin: root.clone(),
            medic: root.clone(),
            patient: root.clone(),
            root,
        };

        world.admin = world.onboard(&world.root.clone(), "admin@kineto.test", Role::TenantAdmin, Some(&company.id));
        world.medic = world.onboard(&world.admin.clone(), "medic@kineto.test", Role::Medic, None);
        world.patient = world.onboard(&world.medic.clone(), "patient@kineto.test", Role::Patient, None);
        world.drain_mail();
        world
    }

    /// Invite `email` as `inviter` and accept right away.
    pub fn onboard(&mut self, inviter: &Actor, email: &str, role: Role, tenant_id: Option<&str>) -> Actor {
        let pending = self.invite(inviter, email, role, tenant_id);
        let token = self.last_token(&pending);
        let user = self
            .clinic
            .accept_invitation(AcceptInvitationRequest {
                token,
                name: email.split('@').next().unwrap().to_string(),
                password: PASSWORD.into(),
            })
            .unwrap();
        Actor::from(&user)
    }

    pub fn invite(&self, inviter: &Actor, email: &str, role: Role, tenant_id: Option<&str>) -> User {
        self.clinic
            .send_invitation(
                inviter,
                InvitationRequest {
                    email: email.into(),
                    role,
                    tenant_id: tenant_id.map(String::from),
                },
            )
            .unwrap()
    }

    /// Token of the invitation most recently mailed to `user`.
    pub fn last_token(&mut self, user: &User) -> String {
        let mail = self
            .drain_mail()
            .into_iter()
            .rev()
            .find(|m| m.to == user.email)
            .expect("invitation email queued");
        token_from_body(&mail.body)
    }

    pub fn drain_mail(&mut self) -> Vec<Email> {
        let mut out = Vec::new();
        while let Ok(mail) = self.outbox.try_recv() {
            out.push(mail);
        }
        out
    }

    pub fn service(&self, name: &str, minutes: u32, price: f64) -> String {
        self.clinic
            .create_service(
                &self.admin,
                ServiceRequest {
                    name: name.into(),
                    description: None,
                    duration_minutes: minutes,
                    price: Some(price),
                    category: None,
                    active: true,
                },
            )
            .unwrap()
            .id
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Pull the token out of the acceptance link in an invitation body.
pub fn token_from_body(body: &str) -> String {
    let start = body.find("/accept-invitation/").expect("acceptance link") + "/accept-invitation/".len();
    body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
