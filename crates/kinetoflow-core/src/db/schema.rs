//! SQLite schema definition.

/// Complete database schema for KinetoFlow.
///
/// Timestamps are fixed-width RFC 3339 text (see [`super::timestamp`]), times
/// of day are `HH:MM:SS`, so every range check below is a text comparison.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Tenants and users
-- ============================================================================

CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    address TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('PLATFORM_ADMIN', 'TENANT_ADMIN', 'MEDIC', 'PATIENT')),
    active INTEGER NOT NULL DEFAULT 0,
    tenant_id TEXT REFERENCES companies(id),
    assigned_medic_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    invitation_token TEXT UNIQUE,
    invitation_expiry TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    -- Platform admins live outside every tenant; medics and patients never do
    CHECK (role <> 'PLATFORM_ADMIN' OR tenant_id IS NULL),
    CHECK (role NOT IN ('MEDIC', 'PATIENT') OR tenant_id IS NOT NULL),
    CHECK (assigned_medic_id IS NULL OR role = 'PATIENT'),
    CHECK ((invitation_token IS NULL) = (invitation_expiry IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_users_tenant_role ON users(tenant_id, role);
CREATE INDEX IF NOT EXISTS idx_users_assigned_medic ON users(assigned_medic_id);

-- ============================================================================
-- Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES companies(id),
    name TEXT NOT NULL,
    description TEXT,
    duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 1),
    price REAL CHECK (price IS NULL OR price >= 0),
    category TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS packages (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES companies(id),
    name TEXT NOT NULL,
    description TEXT,
    total_price REAL CHECK (total_price IS NULL OR total_price >= 0),
    active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (tenant_id, name)
);

CREATE TABLE IF NOT EXISTS package_items (
    id TEXT PRIMARY KEY,
    package_id TEXT NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    service_id TEXT NOT NULL REFERENCES services(id),
    quantity INTEGER NOT NULL CHECK (quantity >= 1),
    UNIQUE (package_id, service_id)
);

CREATE INDEX IF NOT EXISTS idx_package_items_service ON package_items(service_id);

-- ============================================================================
-- Patient plans
-- ============================================================================

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES users(id),
    assigned_by_id TEXT NOT NULL REFERENCES users(id),
    tenant_id TEXT NOT NULL REFERENCES companies(id),
    originating_package_id TEXT REFERENCES packages(id) ON DELETE SET NULL,
    active INTEGER NOT NULL DEFAULT 1,
    archived INTEGER NOT NULL DEFAULT 0,
    assigned_at TEXT NOT NULL,
    expiry TEXT,
    notes TEXT,

    -- Archived plans are always inactive
    CHECK (archived = 0 OR active = 0)
);

CREATE INDEX IF NOT EXISTS idx_plans_patient ON plans(patient_id, archived);

CREATE TABLE IF NOT EXISTS plan_items (
    id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
    service_id TEXT NOT NULL REFERENCES services(id),
    total_quantity INTEGER NOT NULL CHECK (total_quantity >= 1),
    remaining_quantity INTEGER NOT NULL
        CHECK (remaining_quantity >= 0 AND remaining_quantity <= total_quantity),
    price_per_unit REAL,
    item_active INTEGER NOT NULL DEFAULT 1,
    archived INTEGER NOT NULL DEFAULT 0,

    CHECK (archived = 0 OR item_active = 0)
);

CREATE INDEX IF NOT EXISTS idx_plan_items_plan ON plan_items(plan_id);

-- ============================================================================
-- Scheduling
-- ============================================================================

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES users(id),
    medic_id TEXT NOT NULL REFERENCES users(id),
    service_id TEXT NOT NULL REFERENCES services(id),
    tenant_id TEXT NOT NULL REFERENCES companies(id),
    scheduled_start TEXT NOT NULL,
    scheduled_end TEXT NOT NULL,
    actual_start TEXT,
    actual_end TEXT,
    status TEXT NOT NULL DEFAULT 'SCHEDULED' CHECK (status IN (
        'SCHEDULED', 'COMPLETED', 'CANCELLED_BY_PATIENT', 'CANCELLED_BY_MEDIC', 'NO_SHOW'
    )),
    notes TEXT,
    plan_item_id TEXT REFERENCES plan_items(id) ON DELETE SET NULL,
    session_consumed INTEGER NOT NULL DEFAULT 0,

    CHECK (scheduled_end > scheduled_start)
);

CREATE INDEX IF NOT EXISTS idx_appointments_medic ON appointments(medic_id, scheduled_start);
CREATE INDEX IF NOT EXISTS idx_appointments_patient ON appointments(patient_id, scheduled_start);
CREATE INDEX IF NOT EXISTS idx_appointments_reconcile
    ON appointments(session_consumed, scheduled_end);

CREATE TABLE IF NOT EXISTS time_blocks (
    id TEXT PRIMARY KEY,
    medic_id TEXT NOT NULL REFERENCES users(id),
    tenant_id TEXT NOT NULL REFERENCES companies(id),
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    reason TEXT,

    CHECK (end_time > start_time)
);

CREATE INDEX IF NOT EXISTS idx_time_blocks_medic ON time_blocks(medic_id, start_time);

CREATE TABLE IF NOT EXISTS working_hours (
    id TEXT PRIMARY KEY,
    medic_id TEXT NOT NULL REFERENCES users(id),
    day_of_week TEXT NOT NULL CHECK (day_of_week IN (
        'MONDAY', 'TUESDAY', 'WEDNESDAY', 'THURSDAY', 'FRIDAY', 'SATURDAY', 'SUNDAY'
    )),
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,

    CHECK (end_time > start_time),
    UNIQUE (medic_id, day_of_week)
);
"#;
