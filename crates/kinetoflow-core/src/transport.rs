//! Request → command dispatch and error → response mapping.
//!
//! An outer HTTP layer only has to turn a route into a [`Command`], pass the
//! bearer token along and write the [`Response`] back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::auth::Actor;
use crate::catalog::{PackageRequest, ServiceRequest};
use crate::directory::CompanyRequest;
use crate::error::{ClinicError, ClinicResult};
use crate::invitations::{AcceptInvitationRequest, InvitationRequest};
use crate::models::{AppointmentStatus, Role};
use crate::plans::AssignPlanRequest;
use crate::scheduling::{CreateAppointmentRequest, TimeBlockRequest, WorkingHoursRequest};
use crate::Clinic;

use chrono::{DateTime, Utc, Weekday};

/// Every operation reachable from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    // Public
    Login { email: String, password: String },
    LookupInvitation { token: String },
    AcceptInvitation(AcceptInvitationRequest),

    // Identity
    CreateCompany(CompanyRequest),
    ListCompanies,
    GetMyCompany,
    UpdateMyCompany { address: Option<String> },
    ListUsersByRole { role: Role },
    SetUserActive { user_id: String, active: bool },
    AssignMedic { patient_id: String, medic_id: Option<String> },
    UpdateProfile { name: String },
    ListAssignedPatients,
    ListPendingInvites,
    CompanyStats,

    // Invitations
    SendInvitation(InvitationRequest),
    ResendInvitation(InvitationRequest),
    CancelInvitation { user_id: String },

    // Catalog
    CreateService(ServiceRequest),
    UpdateService { id: String, service: ServiceRequest },
    SetServiceActive { id: String, active: bool },
    GetService { id: String },
    ListServices,
    ListActiveServices,
    CreatePackage(PackageRequest),
    UpdatePackage { id: String, package: PackageRequest },
    SetPackageActive { id: String, active: bool },
    GetPackage { id: String },
    ListPackages,
    ListActivePackages,

    // Plans
    AssignPlan { patient_id: String, plan: AssignPlanRequest },
    ListPlansForPatient { patient_id: String },
    GetPlan { plan_id: String },
    SetPlanActive { plan_id: String, active: bool },
    ArchivePlan { plan_id: String },
    SetItemActive { item_id: String, active: bool },
    ArchiveItem { item_id: String },
    UpdateItemQuantities { item_id: String, total_quantity: u32, remaining_quantity: u32 },

    // Scheduling
    CreateAppointment(CreateAppointmentRequest),
    CancelAppointment { appointment_id: String, status: AppointmentStatus, reason: Option<String> },
    DeleteAppointment { appointment_id: String },
    CreateTimeBlock(TimeBlockRequest),
    DeleteTimeBlock { block_id: String },
    CalendarEvents { start: DateTime<Utc>, end: DateTime<Utc> },
    SetWorkingHoursDay(WorkingHoursRequest),
    SetWorkingHoursBulk { days: Vec<WorkingHoursRequest> },
    GetWorkingHours,
    DeleteWorkingHoursDay { day: Weekday },
    ClearWorkingHours,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// `Authorization` header value, with or without the `Bearer ` prefix
    #[serde(default)]
    pub bearer: Option<String>,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

type Reply = ClinicResult<(u16, Value)>;

fn ok<T: Serialize>(value: T) -> Reply {
    Ok((200, serde_json::to_value(value)?))
}

fn created<T: Serialize>(value: T) -> Reply {
    Ok((201, serde_json::to_value(value)?))
}

fn accepted<T: Serialize>(value: T) -> Reply {
    Ok((202, serde_json::to_value(value)?))
}

fn no_content(_: ()) -> Reply {
    Ok((204, Value::Null))
}

/// Execute one request against `clinic`.
pub fn handle(clinic: &Clinic, request: Request) -> Response {
    match dispatch(clinic, request) {
        Ok((status, body)) => Response { status, body },
        Err(e) => error_response(clinic, e),
    }
}

/// Parse a JSON-encoded [`Request`] and execute it.
pub fn handle_json(clinic: &Clinic, raw: &str) -> Response {
    match serde_json::from_str::<Request>(raw) {
        Ok(request) => handle(clinic, request),
        Err(e) => {
            debug!(error = %e, "Malformed request");
            error_response(clinic, ClinicError::bad_request(format!("Malformed request: {}", e)))
        }
    }
}

fn error_response(clinic: &Clinic, e: ClinicError) -> Response {
    if let ClinicError::Internal(_) = e {
        error!(error = %e, "Request failed");
    }
    let body = serde_json::to_value(e.to_body(clinic.now())).unwrap_or(Value::Null);
    Response {
        status: e.status(),
        body,
    }
}

fn authenticate(clinic: &Clinic, bearer: Option<&str>) -> ClinicResult<Actor> {
    match bearer.map(str::trim).filter(|b| !b.is_empty()) {
        Some(bearer) => clinic.authenticate(bearer),
        None => Err(ClinicError::Unauthenticated("Authentication required".into())),
    }
}

fn dispatch(clinic: &Clinic, request: Request) -> Reply {
    let Request { bearer, command } = request;
    match command {
        Command::Login { email, password } => ok(clinic.login(&email, &password)?),
        Command::LookupInvitation { token } => ok(clinic.lookup_invitation(&token)?),
        Command::AcceptInvitation(req) => ok(clinic.accept_invitation(req)?),
        command => {
            let actor = authenticate(clinic, bearer.as_deref())?;
            authorized(clinic, &actor, command)
        }
    }
}

fn authorized(clinic: &Clinic, actor: &Actor, command: Command) -> Reply {
    use Command::*;

    match command {
        Login { .. } | LookupInvitation { .. } | AcceptInvitation(_) => {
            Err(ClinicError::bad_request("Already signed in"))
        }

        CreateCompany(req) => created(clinic.create_company(actor, req)?),
        ListCompanies => ok(clinic.list_companies(actor)?),
        GetMyCompany => ok(clinic.get_my_company(actor)?),
        UpdateMyCompany { address } => ok(clinic.update_my_company(actor, address.as_deref())?),
        ListUsersByRole { role } => ok(clinic.list_users_by_role(actor, role)?),
        SetUserActive { user_id, active } => ok(clinic.set_user_active(actor, &user_id, active)?),
        AssignMedic { patient_id, medic_id } => {
            ok(clinic.assign_medic(actor, &patient_id, medic_id.as_deref())?)
        }
        UpdateProfile { name } => ok(clinic.update_profile(actor, &name)?),
        ListAssignedPatients => ok(clinic.list_assigned_patients(actor)?),
        ListPendingInvites => ok(clinic.list_pending_invites(actor)?),
        CompanyStats => ok(clinic.company_stats(actor)?),

        SendInvitation(req) => accepted(clinic.send_invitation(actor, req)?),
        ResendInvitation(req) => accepted(clinic.resend_invitation(actor, req)?),
        CancelInvitation { user_id } => no_content(clinic.cancel_invitation(actor, &user_id)?),

        CreateService(req) => created(clinic.create_service(actor, req)?),
        UpdateService { id, service } => ok(clinic.update_service(actor, &id, service)?),
        SetServiceActive { id, active } => ok(clinic.set_service_active(actor, &id, active)?),
        GetService { id } => ok(clinic.get_service(actor, &id)?),
        ListServices => ok(clinic.list_services(actor)?),
        ListActiveServices => ok(clinic.list_active_services(actor)?),
        CreatePackage(req) => created(clinic.create_package(actor, req)?),
        UpdatePackage { id, package } => ok(clinic.update_package(actor, &id, package)?),
        SetPackageActive { id, active } => ok(clinic.set_package_active(actor, &id, active)?),
        GetPackage { id } => ok(clinic.get_package(actor, &id)?),
        ListPackages => ok(clinic.list_packages(actor)?),
        ListActivePackages => ok(clinic.list_active_packages(actor)?),

        AssignPlan { patient_id, plan } => created(clinic.assign_plan(actor, &patient_id, plan)?),
        ListPlansForPatient { patient_id } => ok(clinic.list_plans_for_patient(actor, &patient_id)?),
        GetPlan { plan_id } => ok(clinic.get_plan(actor, &plan_id)?),
        SetPlanActive { plan_id, active } => ok(clinic.set_plan_active(actor, &plan_id, active)?),
        ArchivePlan { plan_id } => ok(clinic.archive_plan(actor, &plan_id)?),
        SetItemActive { item_id, active } => ok(clinic.set_item_active(actor, &item_id, active)?),
        ArchiveItem { item_id } => ok(clinic.archive_item(actor, &item_id)?),
        UpdateItemQuantities {
            item_id,
            total_quantity,
            remaining_quantity,
        } => ok(clinic.update_item_quantities(actor, &item_id, total_quantity, remaining_quantity)?),

        CreateAppointment(req) => created(clinic.create_appointment(actor, req)?),
        CancelAppointment {
            appointment_id,
            status,
            reason,
        } => ok(clinic.cancel_appointment(actor, &appointment_id, status, reason.as_deref())?),
        DeleteAppointment { appointment_id } => {
            no_content(clinic.delete_appointment(actor, &appointment_id)?)
        }
        CreateTimeBlock(req) => created(clinic.create_time_block(actor, req)?),
        DeleteTimeBlock { block_id } => no_content(clinic.delete_time_block(actor, &block_id)?),
        CalendarEvents { start, end } => ok(clinic.calendar_events(actor, start, end)?),
        SetWorkingHoursDay(req) => ok(clinic.set_working_hours_day(actor, req)?),
        SetWorkingHoursBulk { days } => ok(clinic.set_working_hours_bulk(actor, days)?),
        GetWorkingHours => ok(clinic.get_working_hours(actor)?),
        DeleteWorkingHoursDay { day } => no_content(clinic.delete_working_hours_day(actor, day)?),
        ClearWorkingHours => ok(clinic.clear_working_hours(actor)?),
    }
}
