//! KinetoFlow Core Library
//!
//! Multi-tenant practice management: catalog, patient plans, scheduling and
//! invitation-based onboarding for therapy practices.
//!
//! # Architecture
//!
//! ```text
//!   bearer token ──► authenticate ──► Actor
//!                                       │
//!                         ┌─────────────▼─────────────┐
//!                         │   Clinic (unit of work)   │
//!                         │  authorize → validate →   │
//!                         │  mutate → commit          │
//!                         └──┬──────────┬──────────┬──┘
//!                            │          │          │
//!                         Catalog   PlanEngine  Scheduler ─── Invitations
//!                            │          │          │              │
//!                            └──────────┴────┬─────┘              │ emails
//!                                            ▼                    ▼
//!                                         SQLite             Notifier (async)
//!                                            ▲
//!                                            │ hourly
//!                                 ReconciliationWorker
//!                                 (ended appointment → one session consumed)
//! ```
//!
//! # Core Principle
//!
//! **Sessions are consumed after the fact.** Booking an appointment never
//! touches a plan's counters; the reconciliation job takes the session once
//! the appointment has ended, exactly once per appointment.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence and the unit of work
//! - [`models`]: Domain types (User, Service, Plan, Appointment, etc.)
//! - [`auth`]: Actor, tenant visibility predicate, tokens and password hashing
//! - [`catalog`]: Services and packages
//! - [`plans`]: Patient plans and session counters
//! - [`scheduling`]: Appointments, time blocks, working hours, reconciliation
//! - [`invitations`]: Onboarding by token
//! - [`directory`]: Sign-in, companies and user administration
//! - [`dashboard`]: Per-company counts
//! - [`transport`]: Command dispatch and error mapping for an outer API layer
//! - [`worker`]: Background reconciliation schedule

pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod directory;
pub mod error;
pub mod invitations;
pub mod models;
pub mod plans;
pub mod scheduling;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use auth::{Actor, PasswordHasher, SaltedSha256Hasher, TokenSigner};
pub use catalog::{PackageItemRequest, PackageRequest, ServiceRequest};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Settings;
pub use dashboard::CompanyStats;
pub use db::Database;
pub use directory::{CompanyRequest, LoginResponse};
pub use error::{ClinicError, ClinicResult, ErrorBody};
pub use invitations::{AcceptInvitationRequest, InvitationDetails, InvitationRequest};
pub use models::{
    Appointment, AppointmentStatus, CalendarEvent, Company, Package, PackageItem, Plan, PlanItem,
    Role, Service, TimeBlock, User, WorkingHours,
};
pub use plans::{AssignPlanRequest, PlanServiceItem};
pub use scheduling::{
    CreateAppointmentRequest, ReconciliationReport, TimeBlockRequest, WorkingHoursRequest,
};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc, Weekday};
use kinetoflow_mail::Notifier;
use tracing::info;

use catalog::Catalog;
use directory::Directory;
use invitations::Invitations;
use plans::PlanEngine;
use scheduling::{Reconciler, Scheduler};

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe entry point. Every mutating call runs in one unit of work;
/// emails are queued only after it has committed.
pub struct Clinic {
    db: Arc<Mutex<Database>>,
    settings: Settings,
    notifier: Notifier,
    signer: TokenSigner,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
}

impl Clinic {
    /// Wrap an open database.
    pub fn new(db: Database, settings: Settings, notifier: Notifier) -> Self {
        let signer = TokenSigner::new(
            settings.jwt.secret.as_bytes().to_vec(),
            settings.jwt.issuer.clone(),
            settings.jwt_ttl(),
        );
        Self {
            db: Arc::new(Mutex::new(db)),
            settings,
            notifier,
            signer,
            hasher: Arc::new(SaltedSha256Hasher),
            clock: Arc::new(SystemClock),
        }
    }

    /// Open the configured database (in memory when no path is set).
    pub fn open(settings: Settings, notifier: Notifier) -> ClinicResult<Self> {
        let db = match settings.database.path.as_ref() {
            Some(path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        };
        info!(path = ?settings.database.path, "Database opened");
        Ok(Self::new(db, settings, notifier))
    }

    /// Create an in-memory instance (for testing).
    pub fn in_memory(settings: Settings, notifier: Notifier) -> ClinicResult<Self> {
        Ok(Self::new(Database::open_in_memory()?, settings, notifier))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` in one unit of work with the current time.
    fn transact<T, F>(&self, f: F) -> ClinicResult<T>
    where
        F: FnOnce(&Database, DateTime<Utc>) -> ClinicResult<T>,
    {
        let now = self.clock.now();
        let db = self.db.lock()?;
        db.unit_of_work(|db| f(db, now))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn login(&self, email: &str, password: &str) -> ClinicResult<LoginResponse> {
        self.transact(|db, now| {
            Directory::new(db, self.hasher.as_ref()).login(&self.signer, email, password, now)
        })
    }

    /// Resolve a bearer token to an actor.
    pub fn authenticate(&self, bearer: &str) -> ClinicResult<Actor> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        Directory::new(&db, self.hasher.as_ref()).authenticate(&self.signer, bearer, now)
    }

    /// Bootstrap a platform administrator.
    pub fn create_platform_admin(&self, name: &str, email: &str, password: &str) -> ClinicResult<User> {
        self.transact(|db, now| {
            Directory::new(db, self.hasher.as_ref()).create_platform_admin(name, email, password, now)
        })
    }

    pub fn create_company(&self, actor: &Actor, req: CompanyRequest) -> ClinicResult<Company> {
        self.transact(|db, now| Directory::new(db, self.hasher.as_ref()).create_company(actor, req, now))
    }

    pub fn list_companies(&self, actor: &Actor) -> ClinicResult<Vec<Company>> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).list_companies(actor))
    }

    pub fn get_my_company(&self, actor: &Actor) -> ClinicResult<Company> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).get_my_company(actor))
    }

    pub fn update_my_company(&self, actor: &Actor, address: Option<&str>) -> ClinicResult<Company> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).update_my_company(actor, address))
    }

    pub fn list_users_by_role(&self, actor: &Actor, role: Role) -> ClinicResult<Vec<User>> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).list_users_by_role(actor, role))
    }

    pub fn set_user_active(&self, actor: &Actor, user_id: &str, active: bool) -> ClinicResult<User> {
        self.transact(|db, now| {
            Directory::new(db, self.hasher.as_ref()).set_user_active(actor, user_id, active, now)
        })
    }

    pub fn assign_medic(&self, actor: &Actor, patient_id: &str, medic_id: Option<&str>) -> ClinicResult<User> {
        self.transact(|db, now| {
            Directory::new(db, self.hasher.as_ref()).assign_medic(actor, patient_id, medic_id, now)
        })
    }

    pub fn update_profile(&self, actor: &Actor, name: &str) -> ClinicResult<User> {
        self.transact(|db, now| Directory::new(db, self.hasher.as_ref()).update_profile(actor, name, now))
    }

    pub fn list_assigned_patients(&self, actor: &Actor) -> ClinicResult<Vec<User>> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).list_assigned_patients(actor))
    }

    pub fn list_pending_invites(&self, actor: &Actor) -> ClinicResult<Vec<User>> {
        self.transact(|db, _| Directory::new(db, self.hasher.as_ref()).list_pending_invites(actor))
    }

    pub fn company_stats(&self, actor: &Actor) -> ClinicResult<CompanyStats> {
        self.transact(|db, _| dashboard::company_stats(db, actor))
    }

    // =========================================================================
    // Invitations
    // =========================================================================

    fn invitations<'a>(&'a self, db: &'a Database) -> Invitations<'a> {
        Invitations::new(db, &self.settings, self.hasher.as_ref())
    }

    /// Invite a user; the email goes out after commit.
    pub fn send_invitation(&self, actor: &Actor, req: InvitationRequest) -> ClinicResult<User> {
        let (user, email) = self.transact(|db, now| self.invitations(db).send_invitation(actor, req, now))?;
        self.notifier.dispatch(email);
        Ok(user)
    }

    pub fn resend_invitation(&self, actor: &Actor, req: InvitationRequest) -> ClinicResult<User> {
        let (user, email) =
            self.transact(|db, now| self.invitations(db).resend_invitation(actor, req, now))?;
        self.notifier.dispatch(email);
        Ok(user)
    }

    pub fn lookup_invitation(&self, token: &str) -> ClinicResult<InvitationDetails> {
        self.transact(|db, now| self.invitations(db).lookup_invitation(token, now))
    }

    pub fn accept_invitation(&self, req: AcceptInvitationRequest) -> ClinicResult<User> {
        let (user, email) = self.transact(|db, now| self.invitations(db).accept_invitation(req, now))?;
        self.notifier.dispatch(email);
        Ok(user)
    }

    pub fn cancel_invitation(&self, actor: &Actor, user_id: &str) -> ClinicResult<()> {
        self.transact(|db, now| self.invitations(db).cancel_invitation(actor, user_id, now))
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    pub fn create_service(&self, actor: &Actor, req: ServiceRequest) -> ClinicResult<Service> {
        self.transact(|db, _| Catalog::new(db).create_service(actor, req))
    }

    pub fn update_service(&self, actor: &Actor, id: &str, req: ServiceRequest) -> ClinicResult<Service> {
        self.transact(|db, _| Catalog::new(db).update_service(actor, id, req))
    }

    pub fn set_service_active(&self, actor: &Actor, id: &str, active: bool) -> ClinicResult<Service> {
        self.transact(|db, _| Catalog::new(db).set_service_active(actor, id, active))
    }

    pub fn get_service(&self, actor: &Actor, id: &str) -> ClinicResult<Service> {
        self.transact(|db, _| Catalog::new(db).get_service(actor, id))
    }

    pub fn list_services(&self, actor: &Actor) -> ClinicResult<Vec<Service>> {
        self.transact(|db, _| Catalog::new(db).list_services(actor))
    }

    pub fn list_active_services(&self, actor: &Actor) -> ClinicResult<Vec<Service>> {
        self.transact(|db, _| Catalog::new(db).list_active_services(actor))
    }

    pub fn create_package(&self, actor: &Actor, req: PackageRequest) -> ClinicResult<Package> {
        self.transact(|db, _| Catalog::new(db).create_package(actor, req))
    }

    pub fn update_package(&self, actor: &Actor, id: &str, req: PackageRequest) -> ClinicResult<Package> {
        self.transact(|db, _| Catalog::new(db).update_package(actor, id, req))
    }

    pub fn set_package_active(&self, actor: &Actor, id: &str, active: bool) -> ClinicResult<Package> {
        self.transact(|db, _| Catalog::new(db).set_package_active(actor, id, active))
    }

    pub fn get_package(&self, actor: &Actor, id: &str) -> ClinicResult<Package> {
        self.transact(|db, _| Catalog::new(db).get_package(actor, id))
    }

    pub fn list_packages(&self, actor: &Actor) -> ClinicResult<Vec<Package>> {
        self.transact(|db, _| Catalog::new(db).list_packages(actor))
    }

    pub fn list_active_packages(&self, actor: &Actor) -> ClinicResult<Vec<Package>> {
        self.transact(|db, _| Catalog::new(db).list_active_packages(actor))
    }

    // =========================================================================
    // Plans
    // =========================================================================

    pub fn assign_plan(&self, actor: &Actor, patient_id: &str, req: AssignPlanRequest) -> ClinicResult<Plan> {
        self.transact(|db, now| PlanEngine::new(db).assign_plan(actor, patient_id, req, now))
    }

    pub fn list_plans_for_patient(&self, actor: &Actor, patient_id: &str) -> ClinicResult<Vec<Plan>> {
        self.transact(|db, _| PlanEngine::new(db).list_plans_for_patient(actor, patient_id))
    }

    pub fn get_plan(&self, actor: &Actor, plan_id: &str) -> ClinicResult<Plan> {
        self.transact(|db, _| PlanEngine::new(db).get_plan(actor, plan_id))
    }

    pub fn set_plan_active(&self, actor: &Actor, plan_id: &str, active: bool) -> ClinicResult<Plan> {
        self.transact(|db, _| PlanEngine::new(db).set_plan_active(actor, plan_id, active))
    }

    pub fn archive_plan(&self, actor: &Actor, plan_id: &str) -> ClinicResult<Plan> {
        self.transact(|db, _| PlanEngine::new(db).archive_plan(actor, plan_id))
    }

    pub fn set_item_active(&self, actor: &Actor, item_id: &str, active: bool) -> ClinicResult<PlanItem> {
        self.transact(|db, _| PlanEngine::new(db).set_item_active(actor, item_id, active))
    }

    pub fn archive_item(&self, actor: &Actor, item_id: &str) -> ClinicResult<PlanItem> {
        self.transact(|db, _| PlanEngine::new(db).archive_item(actor, item_id))
    }

    pub fn update_item_quantities(
        &self,
        actor: &Actor,
        item_id: &str,
        total: u32,
        remaining: u32,
    ) -> ClinicResult<PlanItem> {
        self.transact(|db, _| PlanEngine::new(db).update_item_quantities(actor, item_id, total, remaining))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    pub fn create_appointment(&self, actor: &Actor, req: CreateAppointmentRequest) -> ClinicResult<Appointment> {
        self.transact(|db, now| Scheduler::new(db).create_appointment(actor, req, now))
    }

    pub fn cancel_appointment(
        &self,
        actor: &Actor,
        id: &str,
        status: AppointmentStatus,
        reason: Option<&str>,
    ) -> ClinicResult<Appointment> {
        self.transact(|db, _| Scheduler::new(db).cancel_appointment(actor, id, status, reason))
    }

    pub fn delete_appointment(&self, actor: &Actor, id: &str) -> ClinicResult<()> {
        self.transact(|db, now| Scheduler::new(db).delete_appointment(actor, id, now))
    }

    pub fn create_time_block(&self, actor: &Actor, req: TimeBlockRequest) -> ClinicResult<TimeBlock> {
        self.transact(|db, _| Scheduler::new(db).create_time_block(actor, req))
    }

    pub fn delete_time_block(&self, actor: &Actor, id: &str) -> ClinicResult<()> {
        self.transact(|db, _| Scheduler::new(db).delete_time_block(actor, id))
    }

    pub fn calendar_events(
        &self,
        actor: &Actor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ClinicResult<Vec<CalendarEvent>> {
        self.transact(|db, _| Scheduler::new(db).calendar_events(actor, from, to))
    }

    pub fn set_working_hours_day(&self, actor: &Actor, req: WorkingHoursRequest) -> ClinicResult<WorkingHours> {
        self.transact(|db, _| Scheduler::new(db).set_working_hours_day(actor, req))
    }

    pub fn set_working_hours_bulk(
        &self,
        actor: &Actor,
        days: Vec<WorkingHoursRequest>,
    ) -> ClinicResult<Vec<WorkingHours>> {
        self.transact(|db, _| Scheduler::new(db).set_working_hours_bulk(actor, days))
    }

    pub fn get_working_hours(&self, actor: &Actor) -> ClinicResult<Vec<WorkingHours>> {
        self.transact(|db, _| Scheduler::new(db).get_working_hours(actor))
    }

    pub fn delete_working_hours_day(&self, actor: &Actor, day: Weekday) -> ClinicResult<()> {
        self.transact(|db, _| Scheduler::new(db).delete_working_hours_day(actor, day))
    }

    pub fn clear_working_hours(&self, actor: &Actor) -> ClinicResult<usize> {
        self.transact(|db, _| Scheduler::new(db).clear_working_hours(actor))
    }

    /// One reconciliation pass at the current time. Each appointment commits
    /// on its own.
    pub fn reconcile_sessions(&self) -> ClinicResult<ReconciliationReport> {
        let now = self.clock.now();
        let db = self.db.lock()?;
        Ok(Reconciler::new(&db).run(now)?)
    }
}
