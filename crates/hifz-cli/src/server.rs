use std::sync::Arc;

use hifz_core::{EngineError, LearnerProfile, SessionController, Timestamp, now_unix_secs};
use hifz_store::Store;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::input::{ContentMap, decode_events};

type Controller = SessionController<Store, ContentMap>;

#[derive(Clone)]
pub struct HifzServer {
    controller: Arc<Mutex<Controller>>,
    clock: fn() -> Timestamp,
    tool_router: ToolRouter<Self>,
}

impl HifzServer {
    pub fn new(controller: Controller) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            clock: now_unix_secs,
            tool_router: Self::tool_router(),
        }
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Unavailability is reported as a tool-level error so the client can fall
/// back to its own flow; everything else is a protocol error.
fn engine_result<T: Serialize>(result: hifz_core::Result<T>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => json_result(&value),
        Err(e @ EngineError::Unavailable(_)) => {
            tracing::warn!("{e}");
            Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
        }
        Err(
            e @ (EngineError::LearnerNotFound(_)
            | EngineError::SessionNotFound(_)
            | EngineError::InvalidConfig(_)),
        ) => Err(McpError::invalid_params(e.to_string(), None)),
        Err(e) => Err(McpError::internal_error(e.to_string(), None)),
    }
}

fn parse_session_id(id: &str) -> Result<Uuid, McpError> {
    Uuid::parse_str(id.trim())
        .map_err(|e| McpError::invalid_params(format!("invalid session_id '{id}': {e}"), None))
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct LearnerRequest {
    /// Learner identifier
    learner_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EnrollRequest {
    /// New learner identifier
    learner_id: String,
    /// Daily study budget in minutes
    daily_minutes: Option<u32>,
    /// Offset of the learner's local day from UTC, in minutes
    utc_offset_minutes: Option<i32>,
    /// First verse to memorize (global ayah number)
    cursor: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EventsRequest {
    learner_id: String,
    /// Session id returned by hifz_start_session
    session_id: String,
    /// Session events: {verse | from_verse+to_verse, stage, phase, grade?,
    /// duration_secs?, occurred_at}. Invalid entries are dropped and counted.
    events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct BrowseRequest {
    learner_id: String,
    /// Seconds spent reading without recall
    seconds: u32,
}

#[tool_router]
impl HifzServer {
    #[tool(
        description = "Enroll a learner. Optional daily_minutes, utc_offset_minutes and cursor (first verse to memorize) override defaults. Enrolling an existing learner is an error."
    )]
    async fn hifz_enroll(
        &self,
        Parameters(req): Parameters<EnrollRequest>,
    ) -> Result<CallToolResult, McpError> {
        let mut controller = self.controller.lock().await;
        let mut profile = LearnerProfile::new(&req.learner_id, controller.config());
        if let Some(minutes) = req.daily_minutes {
            profile = profile.with_daily_minutes(minutes);
        }
        if let Some(offset) = req.utc_offset_minutes {
            profile = profile.with_offset(offset);
        }
        if let Some(cursor) = req.cursor {
            profile = profile.with_cursor(cursor);
        }
        engine_result(controller.enroll(profile))
    }

    #[tool(
        description = "Open today's session for a learner, or return the one already open. Returns the ordered step list (warm-up, weekly test, link repair, reviews, new material) with pacing mode and review debt."
    )]
    async fn hifz_start_session(
        &self,
        Parameters(req): Parameters<LearnerRequest>,
    ) -> Result<CallToolResult, McpError> {
        let now = (self.clock)();
        let mut controller = self.controller.lock().await;
        engine_result(controller.start_session(&req.learner_id, now))
    }

    #[tool(
        description = "Evaluate the warm-up gate with the events recorded so far. A first failure appends retry steps; a failed retry locks the day to review only. Returns the updated step list."
    )]
    async fn hifz_checkpoint_warmup(
        &self,
        Parameters(req): Parameters<EventsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = parse_session_id(&req.session_id)?;
        let (events, malformed) = decode_events(req.events);
        let now = (self.clock)();
        let mut controller = self.controller.lock().await;
        let result = controller
            .checkpoint_warmup(&req.learner_id, session_id, &events, now)
            .map(|mut checkpoint| {
                checkpoint.dropped_events += malformed;
                checkpoint
            });
        engine_result(result)
    }

    #[tool(
        description = "Complete a session: replay its events, update verse memory states and transitions, advance the memorization cursor and adapt pacing. Completing twice is a no-op."
    )]
    async fn hifz_complete_session(
        &self,
        Parameters(req): Parameters<EventsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = parse_session_id(&req.session_id)?;
        let (events, malformed) = decode_events(req.events);
        let now = (self.clock)();
        let mut controller = self.controller.lock().await;
        let result = controller
            .complete_session(&req.learner_id, session_id, &events, now)
            .map(|mut report| {
                report.dropped_events += malformed;
                report
            });
        engine_result(result)
    }

    #[tool(description = "Record passive reading time toward the daily streak.")]
    async fn hifz_record_browse(
        &self,
        Parameters(req): Parameters<BrowseRequest>,
    ) -> Result<CallToolResult, McpError> {
        let now = (self.clock)();
        let mut controller = self.controller.lock().await;
        let result = controller
            .record_browse(&req.learner_id, req.seconds, now)
            .map(|()| serde_json::json!({ "recorded_seconds": req.seconds }));
        engine_result(result)
    }

    #[tool(description = "Current and longest daily streak, with grace days used.")]
    async fn hifz_streak(
        &self,
        Parameters(req): Parameters<LearnerRequest>,
    ) -> Result<CallToolResult, McpError> {
        let now = (self.clock)();
        let controller = self.controller.lock().await;
        engine_result(controller.streak(&req.learner_id, now))
    }

    #[tool(
        description = "Learner summary: cursor, verses due by band, weak transitions, review debt, pacing mode and today's plan status. Read-only."
    )]
    async fn hifz_status(
        &self,
        Parameters(req): Parameters<LearnerRequest>,
    ) -> Result<CallToolResult, McpError> {
        let now = (self.clock)();
        let controller = self.controller.lock().await;
        engine_result(controller.status(&req.learner_id, now))
    }
}

#[tool_handler]
impl ServerHandler for HifzServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Retention scheduler for Qur'an memorization.\n\n\
                 DAILY FLOW:\n\
                 1. hifz_start_session returns today's ordered steps. Calling it again the same day returns the same plan.\n\
                 2. If the plan has warm-up steps, send their graded events to hifz_checkpoint_warmup before new material.\n\
                 3. Send every event of the day to hifz_complete_session once the learner is done.\n\
                 Use hifz_status and hifz_streak for progress summaries."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
