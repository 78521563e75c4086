use crate::entities;
use crate::errors::LudoraError;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, LudoraError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| LudoraError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();

    // Cleanup expired sessions job - runs every hour
    let cleanup_sessions_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running cleanup_expired_sessions job");
            let execution_id = start_job_execution(&db, "cleanup_expired_sessions")
                .await
                .ok();

            match storage::cleanup_expired_sessions(&db).await {
                Ok(count) => {
                    info!("Cleaned up {} expired sessions", count);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, true, None, Some(count as i64)).await;
                    }
                }
                Err(e) => {
                    error!("Failed to cleanup expired sessions: {}", e);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, false, Some(e.to_string()), None).await;
                    }
                }
            }
        })
    })
    .map_err(|e| LudoraError::Other(format!("Failed to create cleanup sessions job: {}", e)))?;

    sched
        .add(cleanup_sessions_job)
        .await
        .map_err(|e| LudoraError::Other(format!("Failed to add cleanup sessions job: {}", e)))?;

    let db_clone = db.clone();

    // Subscription expiry sweep - runs every hour at 30 minutes past.
    // Lapsed subscriptions also lose against the expiry check at read time;
    // the sweep keeps status columns honest for reporting.
    let expire_subscriptions_job = Job::new_async("0 30 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running expire_lapsed_subscriptions job");
            let execution_id = start_job_execution(&db, "expire_lapsed_subscriptions")
                .await
                .ok();

            match storage::expire_lapsed_subscriptions(&db).await {
                Ok(count) => {
                    info!("Marked {} subscriptions expired", count);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, true, None, Some(count as i64)).await;
                    }
                }
                Err(e) => {
                    error!("Failed to expire lapsed subscriptions: {}", e);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, false, Some(e.to_string()), None).await;
                    }
                }
            }
        })
    })
    .map_err(|e| LudoraError::Other(format!("Failed to create subscription expiry job: {}", e)))?;

    sched
        .add(expire_subscriptions_job)
        .await
        .map_err(|e| LudoraError::Other(format!("Failed to add subscription expiry job: {}", e)))?;

    // Start the scheduler
    sched
        .start()
        .await
        .map_err(|e| LudoraError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", 2);

    Ok(sched)
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, LudoraError> {
    use entities::job_execution;

    let now = Utc::now().timestamp();

    let execution = job_execution::ActiveModel {
        id: Default::default(),
        job_name: Set(job_name.to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), LudoraError> {
    use entities::job_execution::{Column, Entity};

    let now = Utc::now().timestamp();

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(now));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Manually trigger a job by name (useful for admin API)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<entities::job_execution::Model, LudoraError> {
    use entities::job_execution::{Column, Entity};

    // Validate the name before recording anything
    match job_name {
        "cleanup_expired_sessions" | "expire_lapsed_subscriptions" => {}
        _ => {
            return Err(LudoraError::BadRequest(format!(
                "Unknown job name: {}",
                job_name
            )));
        }
    }

    info!("Manually triggering job: {}", job_name);
    let execution_id = start_job_execution(db, job_name).await?;

    let result = if job_name == "cleanup_expired_sessions" {
        storage::cleanup_expired_sessions(db).await
    } else {
        storage::expire_lapsed_subscriptions(db).await
    };

    match result {
        Ok(count) => {
            info!(
                "Manually triggered job {} completed: {} records",
                job_name, count
            );
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
        }
        Err(e) => {
            error!("Manually triggered job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
        }
    }

    Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
        .ok_or_else(|| LudoraError::Other("Job execution row missing after run".to_string()))
}

/// Latest execution records, newest first, for the admin job view.
pub async fn list_recent_executions(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<entities::job_execution::Model>, LudoraError> {
    use entities::job_execution::{Column, Entity};

    Ok(Entity::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_db::TestDb;

    #[tokio::test]
    async fn test_trigger_job_records_execution() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let execution = trigger_job_manually(db, "cleanup_expired_sessions")
            .await
            .unwrap();
        assert_eq!(execution.job_name, "cleanup_expired_sessions");
        assert_eq!(execution.success, Some(1));
        assert_eq!(execution.records_processed, Some(0));
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_trigger_unknown_job_is_rejected() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let err = trigger_job_manually(db, "reticulate_splines")
            .await
            .unwrap_err();
        assert!(matches!(err, LudoraError::BadRequest(_)));

        // A rejected trigger leaves no execution record behind
        let executions = list_recent_executions(db, 10).await.unwrap();
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_sweep_counts_lapsed_subscriptions() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        let teacher = storage::create_user(db, "t@example.com", "pw", "Teacher", "teacher")
            .await
            .unwrap();
        let plan = storage::create_plan(db, "Classroom", &serde_json::json!({"game": 5}))
            .await
            .unwrap();
        let past = Utc::now().timestamp() - 3600;
        storage::create_subscription(db, &teacher.id, &plan.id, Some(past))
            .await
            .unwrap();

        let execution = trigger_job_manually(db, "expire_lapsed_subscriptions")
            .await
            .unwrap();
        assert_eq!(execution.success, Some(1));
        assert_eq!(execution.records_processed, Some(1));
    }

    #[tokio::test]
    async fn test_list_recent_executions_newest_first() {
        let test_db = TestDb::new().await;
        let db = test_db.connection();

        for _ in 0..3 {
            trigger_job_manually(db, "cleanup_expired_sessions")
                .await
                .unwrap();
        }

        let executions = list_recent_executions(db, 2).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert!(executions[0].id > executions[1].id);
    }
}
