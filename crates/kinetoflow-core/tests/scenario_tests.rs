//! End-to-end scenarios through the `Clinic` facade.

mod common;

use chrono::Duration;
use common::{monday, token_from_body, World, PASSWORD};
use kinetoflow_core::{
    AcceptInvitationRequest, AppointmentStatus, AssignPlanRequest, CalendarEvent, ClinicError,
    CompanyRequest, CreateAppointmentRequest, InvitationRequest, PackageItemRequest,
    PackageRequest, PlanServiceItem, Role, TimeBlockRequest,
};
use kinetoflow_mail::EmailKind;

fn plan_with(world: &World, service_id: &str, quantity: u32) -> kinetoflow_core::Plan {
    world
        .clinic
        .assign_plan(
            &world.admin,
            &world.patient.id,
            AssignPlanRequest {
                service_items: vec![PlanServiceItem {
                    service_id: service_id.into(),
                    quantity,
                }],
                ..Default::default()
            },
        )
        .unwrap()
}

fn booking(world: &World, service_id: &str, from: (u32, u32), to: (u32, u32)) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        patient_id: world.patient.id.clone(),
        service_id: service_id.into(),
        scheduled_start: monday(from.0, from.1),
        scheduled_end: monday(to.0, to.1),
        notes: None,
        plan_item_id: None,
    }
}

fn package(name: &str, items: &[(&str, u32)]) -> PackageRequest {
    PackageRequest {
        name: name.into(),
        description: None,
        total_price: None,
        active: true,
        items: items
            .iter()
            .map(|(service_id, quantity)| PackageItemRequest {
                service_id: service_id.to_string(),
                quantity: *quantity,
            })
            .collect(),
    }
}

#[test]
fn test_plan_consumption() {
    let world = World::new();
    let service = world.service("Kinetotherapy", 60, 120.0);
    let plan = plan_with(&world, &service, 3);
    let item_id = plan.items[0].id.clone();

    let mut req = booking(&world, &service, (10, 0), (11, 0));
    req.plan_item_id = Some(item_id.clone());
    let appt = world.clinic.create_appointment(&world.medic, req).unwrap();
    assert_eq!(appt.status, AppointmentStatus::Scheduled);
    assert!(!appt.session_consumed);

    // Booking does not touch the counters.
    let untouched = world.clinic.get_plan(&world.admin, &plan.id).unwrap();
    assert_eq!(untouched.items[0].remaining_quantity, 3);

    world.clock.set(monday(11, 30));
    let report = world.clinic.reconcile_sessions().unwrap();
    assert_eq!(report.consumed, 1);

    let after = world.clinic.get_plan(&world.admin, &plan.id).unwrap();
    assert_eq!(after.items[0].remaining_quantity, 2);
    assert_eq!(after.items[0].total_quantity, 3);

    let events = world
        .clinic
        .calendar_events(&world.medic, monday(0, 0), monday(23, 59))
        .unwrap();
    match &events[..] {
        [CalendarEvent::Appointment(a)] => {
            assert_eq!(a.id, appt.id);
            assert_eq!(a.status, AppointmentStatus::Completed);
            assert!(a.session_consumed);
        }
        other => panic!("unexpected calendar: {:?}", other),
    }

    let again = world.clinic.reconcile_sessions().unwrap();
    assert_eq!(again.consumed, 0);
    assert_eq!(again.scanned, 0);
    let unchanged = world.clinic.get_plan(&world.admin, &plan.id).unwrap();
    assert_eq!(unchanged.items[0].remaining_quantity, 2);
}

#[test]
fn test_patient_conflict_rejected() {
    let world = World::new();
    let service = world.service("Kinetotherapy", 60, 120.0);
    world
        .clinic
        .create_appointment(&world.medic, booking(&world, &service, (10, 0), (11, 0)))
        .unwrap();

    let err = world
        .clinic
        .create_appointment(&world.medic, booking(&world, &service, (10, 30), (11, 30)))
        .unwrap_err();
    assert_eq!(err.kind(), "BAD_REQUEST");
    assert!(err.to_string().contains("existing appointment for the patient"));
}

#[test]
fn test_medic_conflict_rejected_for_other_patient() {
    let mut world = World::new();
    let service = world.service("Kinetotherapy", 60, 120.0);
    let medic = world.medic.clone();
    let second = world.onboard(&medic, "second@kineto.test", Role::Patient, None);

    world
        .clinic
        .create_appointment(&world.medic, booking(&world, &service, (10, 0), (11, 0)))
        .unwrap();

    let mut req = booking(&world, &service, (10, 30), (11, 30));
    req.patient_id = second.id;
    let err = world.clinic.create_appointment(&world.medic, req).unwrap_err();
    assert!(err.to_string().contains("existing appointment for the medic"));
}

#[test]
fn test_package_template_expansion() {
    let world = World::new();
    let s1 = world.service("Massage", 30, 80.0);
    let s2 = world.service("Laser", 15, 45.5);
    let pk = world
        .clinic
        .create_package(&world.admin, package("Recovery", &[(&s1, 4), (&s2, 2)]))
        .unwrap();

    let plan = world
        .clinic
        .assign_plan(
            &world.admin,
            &world.patient.id,
            AssignPlanRequest {
                package_id: Some(pk.id.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(plan.originating_package_id.as_deref(), Some(pk.id.as_str()));
    assert_eq!(plan.items.len(), 2);
    let item = |sid: &str| plan.items.iter().find(|i| i.service_id == sid).unwrap();
    assert_eq!((item(&s1).total_quantity, item(&s1).remaining_quantity), (4, 4));
    assert_eq!((item(&s2).total_quantity, item(&s2).remaining_quantity), (2, 2));
    assert_eq!(item(&s1).price_per_unit, Some(80.0));
    assert_eq!(item(&s2).price_per_unit, Some(45.5));
}

#[test]
fn test_invitation_by_medic() {
    let mut world = World::new();
    let medic = world.medic.clone();
    let pending = world.invite(&medic, "a@x.org", Role::Patient, None);

    assert_eq!(pending.tenant_id.as_deref(), Some(world.tenant_id.as_str()));
    assert_eq!(pending.role, Role::Patient);
    assert!(!pending.active);
    assert_eq!(pending.assigned_medic_id.as_deref(), Some(medic.id.as_str()));
    assert!(pending.invitation_token.is_some());

    let token = world.last_token(&pending);
    let details = world.clinic.lookup_invitation(&token).unwrap();
    assert_eq!(details.tenant_name.as_deref(), Some("Kineto"));
    assert_eq!(details.inviter_name.as_deref(), Some("medic"));

    let alice = world
        .clinic
        .accept_invitation(AcceptInvitationRequest {
            token: token.clone(),
            name: "Alice".into(),
            password: "12345678".into(),
        })
        .unwrap();
    assert!(alice.active);
    assert_eq!(alice.name, "Alice");
    assert!(alice.invitation_token.is_none());
    assert!(alice.invitation_expiry.is_none());

    let mail = world.drain_mail();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].kind, EmailKind::Welcome);
    assert_eq!(mail[0].to, "a@x.org");

    // The new patient can sign in right away.
    let login = world.clinic.login("a@x.org", "12345678").unwrap();
    let actor = world.clinic.authenticate(&format!("Bearer {}", login.token)).unwrap();
    assert_eq!(actor.id, alice.id);

    assert_eq!(
        world.clinic.lookup_invitation(&token).unwrap_err(),
        ClinicError::not_found("Invitation")
    );
}

#[test]
fn test_service_deactivation_blocked_by_active_package() {
    let world = World::new();
    let s = world.service("Massage", 30, 80.0);
    let pk = world
        .clinic
        .create_package(&world.admin, package("Relax", &[(&s, 5)]))
        .unwrap();

    let err = world.clinic.set_service_active(&world.admin, &s, false).unwrap_err();
    assert_eq!(err.kind(), "BAD_REQUEST");
    assert!(err.to_string().contains("Relax"));

    world.clinic.set_package_active(&world.admin, &pk.id, false).unwrap();
    let s = world.clinic.set_service_active(&world.admin, &s, false).unwrap();
    assert!(!s.active);

    // And the package cannot come back while the service is off.
    let err = world.clinic.set_package_active(&world.admin, &pk.id, true).unwrap_err();
    assert!(err.to_string().contains("Massage"));
}

#[test]
fn test_cross_tenant_probe_is_not_found() {
    let mut world = World::new();
    let root = world.root.clone();
    let other = world
        .clinic
        .create_company(
            &root,
            CompanyRequest {
                name: "Other".into(),
                address: None,
            },
        )
        .unwrap();
    let other_admin = world.onboard(&root, "boss@other.test", Role::TenantAdmin, Some(&other.id));
    let foreign = world
        .clinic
        .create_service(
            &other_admin,
            kinetoflow_core::ServiceRequest {
                name: "Secret".into(),
                description: None,
                duration_minutes: 45,
                price: None,
                category: None,
                active: true,
            },
        )
        .unwrap();

    assert_eq!(
        world.clinic.get_service(&world.admin, &foreign.id).unwrap_err(),
        ClinicError::not_found("Service")
    );
    assert_eq!(
        world.clinic.set_service_active(&world.admin, &foreign.id, false).unwrap_err(),
        ClinicError::not_found("Service")
    );
    assert_eq!(
        world.clinic.get_plan(&other_admin, "no-such-plan").unwrap_err().kind(),
        "NOT_FOUND"
    );
}

// -------------------------------------------------------------------------
// Round trips
// -------------------------------------------------------------------------

#[test]
fn test_update_package_with_same_items_keeps_rows() {
    let world = World::new();
    let s1 = world.service("Massage", 30, 80.0);
    let s2 = world.service("Laser", 15, 45.0);
    let req = package("Recovery", &[(&s1, 4), (&s2, 2)]);
    let pk = world.clinic.create_package(&world.admin, req.clone()).unwrap();

    let updated = world.clinic.update_package(&world.admin, &pk.id, req).unwrap();

    let mut before: Vec<_> = pk.items.iter().map(|i| (i.id.clone(), i.quantity)).collect();
    let mut after: Vec<_> = updated.items.iter().map(|i| (i.id.clone(), i.quantity)).collect();
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn test_archive_plan_twice() {
    let world = World::new();
    let s = world.service("Massage", 30, 80.0);
    let plan = plan_with(&world, &s, 2);

    let once = world.clinic.archive_plan(&world.medic, &plan.id).unwrap();
    let twice = world.clinic.archive_plan(&world.medic, &plan.id).unwrap();
    assert_eq!(once, twice);
    assert!(twice.archived && !twice.active);
    assert!(twice.items.iter().all(|i| i.archived && !i.item_active));
}

#[test]
fn test_cancelled_invitation_can_be_reissued() {
    let mut world = World::new();
    let medic = world.medic.clone();
    let pending = world.invite(&medic, "b@x.org", Role::Patient, None);
    let first = world.last_token(&pending);

    world.clinic.cancel_invitation(&medic, &pending.id).unwrap();
    assert!(world.clinic.lookup_invitation(&first).is_err());

    let again = world.invite(&medic, "b@x.org", Role::Patient, None);
    assert_eq!(again.id, pending.id);
    let second = world.last_token(&again);
    assert_ne!(first, second);
    assert!(world.clinic.lookup_invitation(&second).is_ok());
}

// -------------------------------------------------------------------------
// Boundaries
// -------------------------------------------------------------------------

#[test]
fn test_zero_length_appointment_rejected() {
    let world = World::new();
    let s = world.service("Massage", 30, 80.0);
    let err = world
        .clinic
        .create_appointment(&world.medic, booking(&world, &s, (10, 0), (10, 0)))
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION");
}

#[test]
fn test_appointment_abutting_block_accepted() {
    let world = World::new();
    let s = world.service("Massage", 30, 80.0);
    world
        .clinic
        .create_time_block(
            &world.medic,
            TimeBlockRequest {
                start: monday(12, 0),
                end: monday(13, 0),
                reason: Some("Lunch".into()),
            },
        )
        .unwrap();

    world
        .clinic
        .create_appointment(&world.medic, booking(&world, &s, (11, 0), (12, 0)))
        .unwrap();
    world
        .clinic
        .create_appointment(&world.medic, booking(&world, &s, (13, 0), (14, 0)))
        .unwrap();
    let err = world
        .clinic
        .create_appointment(&world.medic, booking(&world, &s, (12, 30), (12, 45)))
        .unwrap_err();
    assert!(err.to_string().contains("blocked period"));
}

#[test]
fn test_exhausted_item_blocks_booking() {
    let world = World::new();
    let s = world.service("Massage", 30, 80.0);
    let plan = plan_with(&world, &s, 1);
    let item_id = plan.items[0].id.clone();

    let mut req = booking(&world, &s, (9, 0), (9, 30));
    req.plan_item_id = Some(item_id.clone());
    world.clinic.create_appointment(&world.medic, req).unwrap();

    world.clock.set(monday(10, 0));
    world.clinic.reconcile_sessions().unwrap();

    let mut req = booking(&world, &s, (11, 0), (11, 30));
    req.plan_item_id = Some(item_id);
    let err = world.clinic.create_appointment(&world.medic, req).unwrap_err();
    assert!(err.to_string().contains("No remaining sessions"));
}

#[test]
fn test_expired_invitation_rejected() {
    let mut world = World::new();
    let admin = world.admin.clone();
    let pending = world.invite(&admin, "late@kineto.test", Role::Medic, None);
    let token = world.last_token(&pending);

    world.advance(world.clinic.settings().invitation_ttl() + Duration::minutes(1));
    let err = world
        .clinic
        .accept_invitation(AcceptInvitationRequest {
            token,
            name: "Late".into(),
            password: PASSWORD.into(),
        })
        .unwrap_err();
    assert_eq!(err, ClinicError::bad_request("Invitation has expired."));
}

#[test]
fn test_tenant_admin_cannot_toggle_admins() {
    let mut world = World::new();
    let admin = world.admin.clone();
    let peer = world.onboard(&admin, "peer@kineto.test", Role::TenantAdmin, None);

    for target in [&peer.id, &admin.id] {
        let err = world.clinic.set_user_active(&admin, target, false).unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");
    }

    // Medics can be toggled.
    let medic = world.clinic.set_user_active(&admin, &world.medic.id, false).unwrap();
    assert!(!medic.active);
}

// -------------------------------------------------------------------------
// Onboarding and dashboard
// -------------------------------------------------------------------------

#[test]
fn test_invitation_email_carries_link() {
    let mut world = World::new();
    let admin = world.admin.clone();
    world
        .clinic
        .send_invitation(
            &admin,
            InvitationRequest {
                email: "New.Medic@Kineto.test".into(),
                role: Role::Medic,
                tenant_id: None,
            },
        )
        .unwrap();

    let mail = world.drain_mail();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].kind, EmailKind::Invitation);
    assert_eq!(mail[0].to, "new.medic@kineto.test");
    assert!(mail[0].body.contains("https://app.test/accept-invitation/"));
    assert!(!token_from_body(&mail[0].body).is_empty());
}

#[test]
fn test_dashboard_counts() {
    let mut world = World::new();
    let admin = world.admin.clone();
    let medic = world.medic.clone();
    world.invite(&admin, "pending.medic@kineto.test", Role::Medic, None);
    world.invite(&medic, "pending.patient@kineto.test", Role::Patient, None);
    let orphan = world.onboard(&medic, "orphan@kineto.test", Role::Patient, None);
    world.clinic.assign_medic(&admin, &orphan.id, None).unwrap();

    let stats = world.clinic.company_stats(&admin).unwrap();
    assert_eq!(stats.active_medics, 1);
    assert_eq!(stats.pending_medics, 1);
    assert_eq!(stats.active_patients, 2);
    assert_eq!(stats.pending_patients, 1);
    assert_eq!(stats.unassigned_patients, 1);
}
