//! Database service for subscription-service.
//!
//! All SQL lives here. The lifecycle invariants that must hold under
//! concurrency are enforced at this layer: the trial claim is a
//! compare-and-set on `users.trial_claimed`, at most one active subscription
//! per user is guaranteed by a partial unique index, and duplicate payment
//! confirmations dedupe on a unique `gateway_payment_id` index. Writers
//! demote lapsed active rows inside the same transaction before inserting a
//! replacement so the partial index only ever covers the live generation.

use crate::models::{
    CreatePlan, CreateProduct, CreateSubscription, CreateUser, Payment, Product, ProductSelection,
    RecordPayment, Subscription, SubscriptionPlan, SubscriptionStatus, User, CAPTURED_STATUS,
    TRIAL_DURATION_DAYS, TRIAL_PLAN_ID,
};
use crate::error::AppError;
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Outcome of applying a payment confirmation.
#[derive(Debug, Clone)]
pub struct PaymentApplication {
    pub payment: Payment,
    pub subscription: Subscription,
    /// True only when this confirmation transitioned the subscription to
    /// active. Replays and non-captured statuses leave it false.
    pub activated: bool,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Create a new user.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_user(&self, input: &CreateUser) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let user_id = Uuid::new_v4();
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, email, phone, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING user_id, email, phone, password_hash, credential_epoch, trial_claimed, registered_utc
            "#,
        )
        .bind(user_id)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e))
            }
        })?;

        timer.observe_duration();
        info!(user_id = %user.user_id, "User created");

        Ok(user)
    }

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, email, phone, password_hash, credential_epoch, trial_claimed, registered_utc
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get user: {}", e)))?;

        timer.observe_duration();

        Ok(user)
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Create a new subscription plan.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            INSERT INTO subscription_plans (plan_id, name, price, duration, product_ids)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING plan_id, name, price, duration, product_ids, created_utc
            "#,
        )
        .bind(plan_id)
        .bind(&input.name)
        .bind(input.price)
        .bind(input.duration.as_str())
        .bind(&input.product_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)))?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    /// Get a plan by ID.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, price, duration, product_ids, created_utc
            FROM subscription_plans
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// List all plans.
    #[instrument(skip(self))]
    pub async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, price, duration, product_ids, created_utc
            FROM subscription_plans
            ORDER BY created_utc ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    // =========================================================================
    // Product Operations
    // =========================================================================

    /// Create a new product.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: &CreateProduct) -> Result<Product, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_product"])
            .start_timer();

        let product_id = Uuid::new_v4();
        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (product_id, name, description, product_type, script_ref, output_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING product_id, name, description, product_type, script_ref, output_type, created_utc
            "#,
        )
        .bind(product_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.product_type)
        .bind(&input.script_ref)
        .bind(&input.output_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create product: {}", e)))?;

        timer.observe_duration();
        info!(product_id = %product.product_id, "Product created");

        Ok(product)
    }

    /// Get a product by ID.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_product"])
            .start_timer();

        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, product_type, script_ref, output_type, created_utc
            FROM products
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get product: {}", e)))?;

        timer.observe_duration();

        Ok(product)
    }

    /// List all products.
    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_products"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, product_type, script_ref, output_type, created_utc
            FROM products
            ORDER BY created_utc ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list products: {}", e)))?;

        timer.observe_duration();

        Ok(products)
    }

    /// Get products by a set of IDs.
    #[instrument(skip(self, product_ids))]
    pub async fn get_products_by_ids(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<Product>, AppError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_products_by_ids"])
            .start_timer();

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT product_id, name, description, product_type, script_ref, output_type, created_utc
            FROM products
            WHERE product_id = ANY($1)
            "#,
        )
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get products: {}", e)))?;

        timer.observe_duration();

        Ok(products)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Demote lapsed active rows for a user inside an open transaction.
    ///
    /// Must run before any insert that could trip the one-active-per-user
    /// index, otherwise a row that is expired on the wall clock but still
    /// 'active' in storage would block the new generation.
    async fn expire_lapsed(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired'
            WHERE user_id = $1 AND status = 'active' AND end_utc <= $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to expire lapsed rows: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    /// Find the user's active, unexpired subscription if one exists.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn find_active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active' AND end_utc > $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find active subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Get a subscription by ID.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// List a user's subscriptions, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_subscriptions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions_for_user"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    /// Claim the one-time trial and create an immediately active trial
    /// subscription.
    ///
    /// The claim is a compare-and-set on `users.trial_claimed`; when two
    /// requests race, exactly one sees a row updated and the other gets
    /// `Conflict`. The subscription insert is covered by the
    /// one-active-per-user index as a second line of defense.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_trial_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_trial_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        Self::expire_lapsed(&mut tx, user_id, now).await?;

        let claimed = sqlx::query(
            r#"
            UPDATE users
            SET trial_claimed = TRUE
            WHERE user_id = $1 AND trial_claimed = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to claim trial: {}", e)))?;

        if claimed.rows_affected() == 0 {
            // Either the trial was already claimed or the user does not exist.
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM users WHERE user_id = $1)",
            )
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check user: {}", e)))?;

            return if exists {
                Err(AppError::Conflict(anyhow::anyhow!(
                    "Trial has already been claimed"
                )))
            } else {
                Err(AppError::NotFound(anyhow::anyhow!("User not found")))
            };
        }

        let subscription_id = Uuid::new_v4();
        let end_utc = now + Duration::days(TRIAL_DURATION_DAYS);

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, plan_id, status, start_utc, end_utc)
            VALUES ($1, $2, $3, 'active', $4, $5)
            RETURNING subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            "#,
        )
        .bind(subscription_id)
        .bind(user_id)
        .bind(TRIAL_PLAN_ID)
        .bind(now)
        .bind(end_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(anyhow::anyhow!("User already has an active subscription"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to create trial subscription: {}",
                    e
                ))
            }
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Trial subscription created");

        Ok(subscription)
    }

    /// Create a pending subscription awaiting payment.
    ///
    /// Rejected with `Conflict` while the user holds an active, unexpired
    /// subscription. Pending rows do not conflict with each other; only a
    /// confirmed payment promotes one of them.
    #[instrument(skip(self, input), fields(user_id = %user_id, plan_id = %input.plan_id))]
    pub async fn create_pending_subscription(
        &self,
        user_id: Uuid,
        input: &CreateSubscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_pending_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        Self::expire_lapsed(&mut tx, user_id, now).await?;

        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM subscriptions
                WHERE user_id = $1 AND status = 'active' AND end_utc > $2
            )
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to check active subscription: {}", e))
        })?;

        if active {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "User already has an active subscription"
            )));
        }

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, plan_id, status, start_utc, end_utc)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            "#,
        )
        .bind(subscription_id)
        .bind(user_id)
        .bind(input.plan_id)
        .bind(input.start_utc)
        .bind(input.end_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Pending subscription created");

        Ok(subscription)
    }

    /// Record a payment confirmation and activate the subscription when the
    /// gateway reports the payment as captured.
    ///
    /// Idempotent on `gateway_payment_id`: a replayed confirmation returns
    /// the stored payment and the subscription as it stands, with
    /// `activated = false`. Activation re-anchors a future-dated pending
    /// window to start at confirmation time.
    #[instrument(
        skip(self, input),
        fields(subscription_id = %input.subscription_id, gateway_payment_id = %input.gateway_payment_id)
    )]
    pub async fn record_payment(
        &self,
        user_id: Uuid,
        input: &RecordPayment,
        gateway_status: &str,
        paid_utc: Option<DateTime<Utc>>,
        period_days: i64,
        now: DateTime<Utc>,
    ) -> Result<PaymentApplication, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Replay check before touching anything else.
        if let Some(existing) = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, subscription_id, user_id, gateway_order_id, gateway_payment_id,
                   gateway_signature, amount, status, paid_utc, created_utc
            FROM payments
            WHERE gateway_payment_id = $1
            "#,
        )
        .bind(&input.gateway_payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check payment: {}", e)))?
        {
            let subscription = Self::load_subscription(&mut tx, existing.subscription_id).await?;

            // A replay is only honored by the owner, against the subscription
            // the payment was originally recorded for.
            if subscription.user_id != user_id {
                return Err(AppError::Forbidden(anyhow::anyhow!(
                    "Subscription does not belong to this user"
                )));
            }
            if existing.subscription_id != input.subscription_id {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Payment is recorded against a different subscription"
                )));
            }

            tx.commit().await.map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
            })?;

            timer.observe_duration();
            warn!(
                gateway_payment_id = %input.gateway_payment_id,
                "Duplicate payment confirmation ignored"
            );

            return Ok(PaymentApplication {
                payment: existing,
                subscription,
                activated: false,
            });
        }

        let subscription = Self::load_subscription(&mut tx, input.subscription_id).await?;
        if subscription.user_id != user_id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Subscription does not belong to this user"
            )));
        }

        let payment_id = Uuid::new_v4();
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (payment_id, subscription_id, user_id, gateway_order_id,
                                  gateway_payment_id, gateway_signature, amount, status, paid_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING payment_id, subscription_id, user_id, gateway_order_id, gateway_payment_id,
                      gateway_signature, amount, status, paid_utc, created_utc
            "#,
        )
        .bind(payment_id)
        .bind(input.subscription_id)
        .bind(user_id)
        .bind(&input.gateway_order_id)
        .bind(&input.gateway_payment_id)
        .bind(&input.gateway_signature)
        .bind(input.amount)
        .bind(gateway_status)
        .bind(paid_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                // Lost the race against a concurrent confirmation of the
                // same gateway payment.
                AppError::Conflict(anyhow::anyhow!("Payment already recorded"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e))
            }
        })?;

        let mut activated = false;
        let subscription = if gateway_status == CAPTURED_STATUS
            && subscription.status_kind() == SubscriptionStatus::Pending
        {
            Self::expire_lapsed(&mut tx, user_id, now).await?;

            // A pending window anchored in the future starts at confirmation
            // time instead, keeping the full paid period.
            let (start_utc, end_utc) = if subscription.start_utc > now {
                (now, now + Duration::days(period_days))
            } else {
                (subscription.start_utc, subscription.end_utc)
            };

            let updated = sqlx::query_as::<_, Subscription>(
                r#"
                UPDATE subscriptions
                SET status = 'active', start_utc = $2, end_utc = $3
                WHERE subscription_id = $1 AND status = 'pending'
                RETURNING subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
                "#,
            )
            .bind(subscription.subscription_id)
            .bind(start_utc)
            .bind(end_utc)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(anyhow::anyhow!(
                        "User already has an active subscription"
                    ))
                } else {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to activate subscription: {}",
                        e
                    ))
                }
            })?;

            activated = true;
            updated
        } else {
            subscription
        };

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(
            payment_id = %payment.payment_id,
            status = %payment.status,
            activated = activated,
            "Payment recorded"
        );

        Ok(PaymentApplication {
            payment,
            subscription,
            activated,
        })
    }

    /// Supersede the user's subscription and replace it with a new pending
    /// one on a different plan, atomically. The replacement awaits payment of
    /// any positive prorated difference before activation. A lapsed row still
    /// stored as 'active' can be superseded; the caller clamps its remaining
    /// days to zero.
    #[instrument(skip(self), fields(user_id = %user_id, subscription_id = %subscription_id, new_plan_id = %new_plan_id))]
    pub async fn supersede_and_replace(
        &self,
        user_id: Uuid,
        subscription_id: Uuid,
        new_plan_id: Uuid,
        new_end_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["supersede_and_replace"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let superseded = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'superseded'
            WHERE subscription_id = $1 AND user_id = $2 AND status = 'active'
            "#,
        )
        .bind(subscription_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to supersede subscription: {}", e))
        })?;

        if superseded.rows_affected() == 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Subscription is not currently active"
            )));
        }

        let new_id = Uuid::new_v4();
        let replacement = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, plan_id, status, start_utc, end_utc)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            RETURNING subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            "#,
        )
        .bind(new_id)
        .bind(user_id)
        .bind(new_plan_id)
        .bind(now)
        .bind(new_end_utc)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create replacement: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(
            old_subscription_id = %subscription_id,
            new_subscription_id = %replacement.subscription_id,
            "Plan changed"
        );

        Ok(replacement)
    }

    async fn load_subscription(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        subscription_id: Uuid,
    ) -> Result<Subscription, AppError> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, start_utc, end_utc, created_utc
            FROM subscriptions
            WHERE subscription_id = $1
            FOR UPDATE
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load subscription: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))
    }

    // =========================================================================
    // Payment Queries
    // =========================================================================

    /// List payments recorded against a subscription, newest first.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn list_payments_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_for_subscription"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, subscription_id, user_id, gateway_order_id, gateway_payment_id,
                   gateway_signature, amount, status, paid_utc, created_utc
            FROM payments
            WHERE subscription_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    // =========================================================================
    // Product Selection Operations
    // =========================================================================

    /// Replace the active selection generation for a subscription.
    ///
    /// Soft-deletes the current generation and inserts the new one in a
    /// single transaction; a validation failure upstream means no rows are
    /// touched at all.
    #[instrument(skip(self, product_ids), fields(subscription_id = %subscription_id, count = product_ids.len()))]
    pub async fn replace_selection(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProductSelection>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_selection"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        sqlx::query(
            r#"
            UPDATE product_selections
            SET is_active = FALSE
            WHERE subscription_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(subscription_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to retire selections: {}", e))
        })?;

        let mut selections = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let selection = sqlx::query_as::<_, ProductSelection>(
                r#"
                INSERT INTO product_selections (selection_id, subscription_id, user_id, product_id)
                VALUES ($1, $2, $3, $4)
                RETURNING selection_id, subscription_id, user_id, product_id, is_active, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(subscription_id)
            .bind(user_id)
            .bind(product_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert selection: {}", e))
            })?;
            selections.push(selection);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(
            subscription_id = %subscription_id,
            count = selections.len(),
            "Selection generation replaced"
        );

        Ok(selections)
    }

    /// List the active selection generation for a subscription.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn list_active_selections(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<ProductSelection>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_selections"])
            .start_timer();

        let selections = sqlx::query_as::<_, ProductSelection>(
            r#"
            SELECT selection_id, subscription_id, user_id, product_id, is_active, created_utc
            FROM product_selections
            WHERE subscription_id = $1 AND is_active = TRUE
            ORDER BY created_utc ASC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list selections: {}", e))
        })?;

        timer.observe_duration();

        Ok(selections)
    }

    /// Soft-delete a single selection owned by the user.
    #[instrument(skip(self), fields(selection_id = %selection_id, user_id = %user_id))]
    pub async fn deactivate_selection(
        &self,
        user_id: Uuid,
        selection_id: Uuid,
    ) -> Result<ProductSelection, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["deactivate_selection"])
            .start_timer();

        let selection = sqlx::query_as::<_, ProductSelection>(
            r#"
            UPDATE product_selections
            SET is_active = FALSE
            WHERE selection_id = $1 AND user_id = $2 AND is_active = TRUE
            RETURNING selection_id, subscription_id, user_id, product_id, is_active, created_utc
            "#,
        )
        .bind(selection_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to deactivate selection: {}", e))
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Selection not found")))?;

        timer.observe_duration();

        Ok(selection)
    }
}
