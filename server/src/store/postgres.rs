//! PostgreSQL backend.
//!
//! Each admission runs in one transaction that locks the event row
//! (`SELECT ... FOR UPDATE`), so admissions for the same event are serialized.
//! Partial unique indexes on the ledger back up the duplicate rules, and the
//! counter updates carry their own ceiling predicate. A dropped transaction
//! rolls back, so an abandoned request never leaves half-applied state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{FromRow, PgConnection};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::{fresh_event, merge_event_edit, AdmissionRequest, RegistrationStore, StoreError};
use crate::admission::error::{AdmissionError, Missing};
use crate::admission::rules::{self, PriorAdmissions};
use crate::models::{
    AttendeeInfo, Event, EventId, EventStatus, PaymentStatus, Program, ProgramId, Registration,
    RegistrationId, RegistrationScope, UserId, Visibility,
};

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

const EVENT_COLUMNS: &str = "id, organizer_id, title, category, status, visibility, capacity, \
                             current_attendees, revision";

const REGISTRATION_SELECT: &str = "SELECT r.id, r.event_id, r.user_id, r.scope, r.display_name, \
     r.email, r.phone, r.class_name, r.section, r.branch, r.ticket_type, r.quantity, \
     r.total_amount, r.payment_status, r.check_in_status, r.registered_at, \
     COALESCE(ARRAY_AGG(rp.program_id) FILTER (WHERE rp.program_id IS NOT NULL), '{}') \
         AS program_ids \
     FROM registrations r \
     LEFT JOIN registration_programs rp ON rp.registration_id = r.id";

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: String,
    title: String,
    category: Option<String>,
    status: String,
    visibility: String,
    capacity: Option<i32>,
    current_attendees: i32,
    revision: i64,
}

#[derive(Debug, FromRow)]
struct ProgramRow {
    id: Uuid,
    date_time: Option<DateTime<Utc>>,
    title: String,
    description: Option<String>,
    requires_registration: bool,
    capacity: Option<i32>,
    current_attendees: i32,
}

#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: Uuid,
    event_id: Uuid,
    user_id: String,
    scope: String,
    display_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    class_name: Option<String>,
    section: Option<String>,
    branch: Option<String>,
    ticket_type: String,
    quantity: i32,
    total_amount: Decimal,
    payment_status: String,
    check_in_status: bool,
    registered_at: DateTime<Utc>,
    program_ids: Vec<Uuid>,
}

fn count_from_db(value: i32, what: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {what}: {value}")))
}

fn count_to_db(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| AdmissionError::validation(format!("{what} {value} is too large")).into())
}

impl ProgramRow {
    fn into_program(self) -> Result<Program, StoreError> {
        Ok(Program {
            id: ProgramId::from_uuid(self.id),
            date_time: self.date_time,
            title: self.title,
            description: self.description,
            requires_registration: self.requires_registration,
            capacity: self
                .capacity
                .map(|c| count_from_db(c, "program capacity"))
                .transpose()?,
            current_attendees: count_from_db(self.current_attendees, "program attendees")?,
        })
    }
}

impl EventRow {
    fn into_event(self, programs: Vec<Program>) -> Result<Event, StoreError> {
        Ok(Event {
            id: EventId::from_uuid(self.id),
            organizer_id: self.organizer_id,
            title: self.title,
            category: self.category,
            status: self.status.parse::<EventStatus>().map_err(StoreError::Corrupt)?,
            visibility: self.visibility.parse::<Visibility>().map_err(StoreError::Corrupt)?,
            capacity: self
                .capacity
                .map(|c| count_from_db(c, "event capacity"))
                .transpose()?,
            current_attendees: count_from_db(self.current_attendees, "event attendees")?,
            programs,
            revision: u64::try_from(self.revision)
                .map_err(|_| StoreError::Corrupt(format!("negative revision: {}", self.revision)))?,
        })
    }
}

impl RegistrationRow {
    fn into_registration(self) -> Result<Registration, StoreError> {
        let scope = match self.scope.as_str() {
            "event" => RegistrationScope::Event,
            "program" => RegistrationScope::Program,
            other => return Err(StoreError::Corrupt(format!("unknown scope '{other}'"))),
        };
        let payment_status = match self.payment_status.as_str() {
            "completed" => PaymentStatus::Completed,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "unknown payment status '{other}'"
                )))
            }
        };

        Ok(Registration {
            id: RegistrationId::from_uuid(self.id),
            event_id: EventId::from_uuid(self.event_id),
            user_id: UserId::new(self.user_id),
            scope,
            program_ids: self.program_ids.into_iter().map(ProgramId::from_uuid).collect(),
            attendee: AttendeeInfo {
                display_name: self.display_name,
                email: self.email,
                phone: self.phone,
                class_name: self.class_name,
                section: self.section,
                branch: self.branch,
            },
            ticket_type: self.ticket_type,
            quantity: count_from_db(self.quantity, "quantity")?,
            total_amount: self.total_amount,
            payment_status,
            check_in_status: self.check_in_status,
            registered_at: self.registered_at,
        })
    }
}

/// Maps aborts caused by concurrent writers to [`StoreError::Conflict`].
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let code = db.code();
        if matches!(
            code.as_deref(),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE)
        ) {
            return StoreError::Conflict;
        }
    }
    StoreError::Database(err)
}

/// Like [`classify`], but a unique violation becomes the given duplicate rejection.
fn classify_insert(err: sqlx::Error, duplicate: AdmissionError) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Rejected(duplicate);
        }
    }
    classify(err)
}

async fn fetch_event(
    conn: &mut PgConnection,
    event_id: &EventId,
    for_update: bool,
) -> Result<Option<Event>, StoreError> {
    let sql = if for_update {
        format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1")
    };
    let Some(row) = sqlx::query_as::<_, EventRow>(&sql)
        .bind(event_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(classify)?
    else {
        return Ok(None);
    };

    let programs = sqlx::query_as::<_, ProgramRow>(
        "SELECT id, date_time, title, description, requires_registration, capacity, \
                current_attendees
         FROM programs
         WHERE event_id = $1 AND NOT detached
         ORDER BY position",
    )
    .bind(event_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(classify)?
    .into_iter()
    .map(ProgramRow::into_program)
    .collect::<Result<Vec<_>, _>>()?;

    row.into_event(programs).map(Some)
}

async fn fetch_prior(
    conn: &mut PgConnection,
    event_id: &EventId,
    user_id: &UserId,
) -> Result<PriorAdmissions, StoreError> {
    let event_level: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM registrations
             WHERE event_id = $1 AND user_id = $2 AND scope = 'event'
         )",
    )
    .bind(event_id.as_uuid())
    .bind(user_id.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(classify)?;

    let programs: Vec<Uuid> = sqlx::query_scalar(
        "SELECT program_id FROM registration_programs WHERE event_id = $1 AND user_id = $2",
    )
    .bind(event_id.as_uuid())
    .bind(user_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(classify)?;

    Ok(PriorAdmissions {
        event_level,
        programs: programs.into_iter().map(ProgramId::from_uuid).collect(),
    })
}

async fn fetch_detached(
    conn: &mut PgConnection,
    event_id: &EventId,
) -> Result<HashMap<ProgramId, u32>, StoreError> {
    let rows: Vec<(Uuid, i32)> = sqlx::query_as(
        "SELECT id, current_attendees FROM programs WHERE event_id = $1 AND detached",
    )
    .bind(event_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(classify)?;

    rows.into_iter()
        .map(|(id, count)| {
            Ok((ProgramId::from_uuid(id), count_from_db(count, "program attendees")?))
        })
        .collect()
}

async fn write_programs(conn: &mut PgConnection, event: &Event) -> Result<(), StoreError> {
    for (position, program) in event.programs.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| AdmissionError::validation("too many programs"))?;
        let capacity = program
            .capacity
            .map(|c| count_to_db(c, "program capacity"))
            .transpose()?;

        let written = sqlx::query(
            "INSERT INTO programs (id, event_id, position, date_time, title, description,
                                   requires_registration, capacity)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                position = EXCLUDED.position,
                date_time = EXCLUDED.date_time,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                requires_registration = EXCLUDED.requires_registration,
                capacity = EXCLUDED.capacity,
                detached = FALSE
             WHERE programs.event_id = EXCLUDED.event_id",
        )
        .bind(program.id.as_uuid())
        .bind(event.id.as_uuid())
        .bind(position)
        .bind(program.date_time)
        .bind(&program.title)
        .bind(&program.description)
        .bind(program.requires_registration)
        .bind(capacity)
        .execute(&mut *conn)
        .await
        .map_err(classify)?;

        if written.rows_affected() == 0 {
            return Err(AdmissionError::validation(format!(
                "program {} belongs to another event",
                program.id
            ))
            .into());
        }
    }

    let kept: Vec<Uuid> = event.programs.iter().map(|p| *p.id.as_uuid()).collect();
    sqlx::query(
        "UPDATE programs SET detached = TRUE
         WHERE event_id = $1 AND NOT (id = ANY($2))",
    )
    .bind(event.id.as_uuid())
    .bind(&kept)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    async fn bounded_transaction(
        &self,
    ) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
        Ok(tx)
    }
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    async fn load_event(&self, event_id: &EventId) -> Result<Option<Event>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        fetch_event(&mut conn, event_id, false).await
    }

    async fn save_event(&self, event: Event) -> Result<Event, StoreError> {
        let mut tx = self.bounded_transaction().await?;

        let saved = match fetch_event(&mut tx, &event.id, true).await? {
            Some(stored) => {
                let detached = fetch_detached(&mut tx, &stored.id).await?;
                let merged = merge_event_edit(&stored, event, &detached)?;
                sqlx::query(
                    "UPDATE events SET
                        organizer_id = $2, title = $3, category = $4, status = $5,
                        visibility = $6, capacity = $7, revision = $8, updated_at = NOW()
                     WHERE id = $1",
                )
                .bind(merged.id.as_uuid())
                .bind(&merged.organizer_id)
                .bind(&merged.title)
                .bind(&merged.category)
                .bind(merged.status.as_str())
                .bind(merged.visibility.as_str())
                .bind(
                    merged
                        .capacity
                        .map(|c| count_to_db(c, "capacity"))
                        .transpose()?,
                )
                .bind(i64::try_from(merged.revision).map_err(|_| {
                    StoreError::Corrupt(format!("revision overflow: {}", merged.revision))
                })?)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
                merged
            }
            None => {
                let fresh = fresh_event(event)?;
                sqlx::query(
                    "INSERT INTO events (id, organizer_id, title, category, status, visibility,
                                         capacity, current_attendees, revision)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0)",
                )
                .bind(fresh.id.as_uuid())
                .bind(&fresh.organizer_id)
                .bind(&fresh.title)
                .bind(&fresh.category)
                .bind(fresh.status.as_str())
                .bind(fresh.visibility.as_str())
                .bind(
                    fresh
                        .capacity
                        .map(|c| count_to_db(c, "capacity"))
                        .transpose()?,
                )
                .execute(&mut *tx)
                .await
                .map_err(|e| classify_insert(e, AdmissionError::validation("event already exists")))?;
                fresh
            }
        };

        write_programs(&mut tx, &saved).await?;
        tx.commit().await.map_err(classify)?;
        Ok(saved)
    }

    async fn commit_admission(
        &self,
        request: AdmissionRequest,
    ) -> Result<Registration, StoreError> {
        let mut tx = self.bounded_transaction().await?;

        let event = fetch_event(&mut tx, &request.event_id, true)
            .await?
            .ok_or(AdmissionError::NotFound(Missing::Event(request.event_id)))?;
        if event.revision != request.expected_revision {
            return Err(StoreError::Conflict);
        }

        let prior = fetch_prior(&mut tx, &request.event_id, &request.user_id).await?;
        let effects = rules::evaluate(&event, &prior, &request.kind)?;

        let registered_at = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "UPDATE events SET
                current_attendees = current_attendees + $2,
                last_registered_at = GREATEST(last_registered_at, clock_timestamp()),
                updated_at = NOW()
             WHERE id = $1 AND (capacity IS NULL OR current_attendees + $2 <= capacity)
             RETURNING last_registered_at",
        )
        .bind(request.event_id.as_uuid())
        .bind(count_to_db(effects.event_attendees, "quantity")?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?
        .flatten();
        // The row is locked, so a miss means our snapshot no longer holds.
        let registered_at = registered_at.ok_or(StoreError::Conflict)?;

        for program_id in &effects.programs {
            let bumped = sqlx::query(
                "UPDATE programs SET current_attendees = current_attendees + 1
                 WHERE id = $1 AND event_id = $2
                   AND (capacity IS NULL OR current_attendees < capacity)",
            )
            .bind(program_id.as_uuid())
            .bind(request.event_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
            if bumped.rows_affected() != 1 {
                return Err(StoreError::Conflict);
            }
        }

        let registration = Registration {
            id: request.registration_id,
            event_id: request.event_id,
            user_id: request.user_id,
            scope: request.kind.scope(),
            program_ids: request.kind.program_ids(),
            attendee: request.attendee,
            ticket_type: request.ticket_type,
            quantity: request.kind.quantity(),
            total_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Completed,
            check_in_status: false,
            registered_at,
        };

        sqlx::query(
            "INSERT INTO registrations (id, event_id, user_id, scope, display_name, email, phone,
                                        class_name, section, branch, ticket_type, quantity,
                                        total_amount, payment_status, check_in_status,
                                        registered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(registration.id.as_uuid())
        .bind(registration.event_id.as_uuid())
        .bind(registration.user_id.as_str())
        .bind(registration.scope.as_str())
        .bind(&registration.attendee.display_name)
        .bind(&registration.attendee.email)
        .bind(&registration.attendee.phone)
        .bind(&registration.attendee.class_name)
        .bind(&registration.attendee.section)
        .bind(&registration.attendee.branch)
        .bind(&registration.ticket_type)
        .bind(count_to_db(registration.quantity, "quantity")?)
        .bind(registration.total_amount)
        .bind(registration.payment_status.as_str())
        .bind(registration.check_in_status)
        .bind(registration.registered_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            classify_insert(
                e,
                AdmissionError::AlreadyRegistered {
                    event_id: registration.event_id,
                    program_id: None,
                },
            )
        })?;

        for program_id in &registration.program_ids {
            sqlx::query(
                "INSERT INTO registration_programs (registration_id, event_id, user_id, program_id)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(registration.id.as_uuid())
            .bind(registration.event_id.as_uuid())
            .bind(registration.user_id.as_str())
            .bind(program_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                classify_insert(
                    e,
                    AdmissionError::AlreadyRegistered {
                        event_id: registration.event_id,
                        program_id: Some(*program_id),
                    },
                )
            })?;
        }

        tx.commit().await.map_err(classify)?;
        Ok(registration)
    }

    async fn registration(
        &self,
        event_id: &EventId,
        registration_id: &RegistrationId,
    ) -> Result<Option<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(&format!(
            "{REGISTRATION_SELECT} WHERE r.event_id = $1 AND r.id = $2 GROUP BY r.id"
        ))
        .bind(event_id.as_uuid())
        .bind(registration_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .map(RegistrationRow::into_registration)
        .transpose()
    }

    async fn registrations_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(&format!(
            "{REGISTRATION_SELECT} WHERE r.event_id = $1 GROUP BY r.id \
             ORDER BY r.registered_at, r.seq"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?
        .into_iter()
        .map(RegistrationRow::into_registration)
        .collect()
    }

    async fn registrations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Registration>, StoreError> {
        sqlx::query_as::<_, RegistrationRow>(&format!(
            "{REGISTRATION_SELECT} WHERE r.user_id = $1 GROUP BY r.id \
             ORDER BY r.registered_at, r.seq"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?
        .into_iter()
        .map(RegistrationRow::into_registration)
        .collect()
    }

    async fn prior_admissions(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<PriorAdmissions, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        fetch_prior(&mut conn, event_id, user_id).await
    }
}
