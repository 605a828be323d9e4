//! Session manager: runs turns against persisted sessions.
//!
//! For each turn it assembles the [`TurnContext`] from the session's
//! history, runs the [`Pipeline`], then persists what the run produced:
//! the turn, the entry (embedded when an embedder is wired), field
//! statistics, and the session's pointer to its in-progress entry.
//!
//! Turns of one session are serialized by a per-session async mutex;
//! different sessions run concurrently.

use chrono::Utc;
use lorekeep_core::error::{Error, ProviderError};
use lorekeep_core::knowledge::KnowledgeEntry;
use lorekeep_core::schema::{DomainSchema, PersonaVoice, is_uncategorized};
use lorekeep_core::session::{AgentInput, Session, SessionStatus, Turn, TurnContext, TurnSummary};
use lorekeep_store::Repositories;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::enrichment::ClaimValidator;
use crate::pipeline::{Pipeline, PipelineDeps, RunOptions};
use crate::stages::persona::{MAX_PROMPT_GAPS, top_gaps};
use crate::state::PipelineState;

/// What one processed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn: Turn,
    /// The entry as persisted, when the turn was structured.
    pub entry: Option<KnowledgeEntry>,
    pub state: PipelineState,
}

impl TurnOutcome {
    pub fn response(&self) -> &str {
        &self.turn.response
    }

    pub fn is_complete(&self) -> Option<bool> {
        self.state.structuring_output.as_ref().map(|o| o.result.is_complete)
    }
}

pub struct SessionManager {
    repos: Repositories,
    deps: PipelineDeps,
    default_voice: PersonaVoice,
    turn_timeout: Option<Duration>,
    enrichment: Option<ClaimValidator>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(repos: Repositories, deps: PipelineDeps) -> Self {
        Self {
            repos,
            deps,
            default_voice: PersonaVoice::default(),
            turn_timeout: None,
            enrichment: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Voice used when a session has no persona schema.
    pub fn with_default_voice(mut self, voice: PersonaVoice) -> Self {
        self.default_voice = voice;
        self
    }

    /// Fail a turn whose pipeline run takes longer than `timeout`.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    pub fn with_enrichment(mut self, validator: ClaimValidator) -> Self {
        self.enrichment = Some(validator);
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Open a session on the active version of the named domain.
    pub async fn start_session(&self, domain_name: &str) -> Result<Session, Error> {
        let domain = self
            .repos
            .schemas
            .get_active_domain(domain_name)
            .await?
            .ok_or_else(|| Error::not_found("domain", domain_name))?;
        let persona = self.repos.schemas.get_active_persona(domain_name).await?;

        let mut session = Session::new(&domain.id);
        session.persona_schema_id = persona.map(|p| p.id);
        let session = self.repos.sessions.create(session).await?;
        info!(session_id = %session.id, domain = %domain.name, version = domain.version, "Session started");
        Ok(session)
    }

    pub async fn end_session(&self, session_id: &str) -> Result<Session, Error> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        session.status = SessionStatus::Completed;
        session.updated_at = Utc::now();
        let session = self.repos.sessions.update(session).await?;
        self.locks.lock().await.remove(session_id);
        info!(session_id, turns = session.turn_count, "Session ended");
        Ok(session)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, Error> {
        self.load_session(session_id).await?;
        Ok(self.repos.sessions.turns(session_id).await?)
    }

    /// The entry later turns of this session will merge into.
    pub async fn current_entry(&self, session_id: &str) -> Result<Option<KnowledgeEntry>, Error> {
        let session = self.load_session(session_id).await?;
        match session.current_entry_id {
            Some(id) => Ok(self.repos.knowledge.get_by_id(&id).await?),
            None => Ok(None),
        }
    }

    /// Run one user utterance through the pipeline and persist the result.
    pub async fn process_turn(&self, session_id: &str, user_input: &str) -> Result<TurnOutcome, Error> {
        let lock = self.session_lock(session_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.run_turn(session_id, user_input).await
        };
        drop(lock);
        self.release_lock(session_id).await;
        outcome
    }

    async fn run_turn(&self, session_id: &str, user_input: &str) -> Result<TurnOutcome, Error> {
        let mut session = self.load_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(Error::InvalidState(format!("session {session_id} is not active")));
        }

        let domain = self.active_domain(&mut session).await?;
        let voice = self.voice_for(&session).await?;
        let turns = self.repos.sessions.turns(session_id).await?;
        let previous_entry = match &session.current_entry_id {
            Some(id) => self.repos.knowledge.get_by_id(id).await?,
            None => None,
        };
        let turn_context = build_turn_context(&turns, previous_entry.clone());
        let options = RunOptions {
            active_category: previous_entry.as_ref().map(|e| e.category_id.clone()),
            turn_context: Some(turn_context.clone()),
        };

        let pipeline = Pipeline::new(&self.deps, domain.clone(), voice);
        let state = self.run_with_timeout(&pipeline, AgentInput::new(session_id, user_input), options).await?;

        let turn_id = uuid::Uuid::new_v4().to_string();
        let entry = match state.entry() {
            Some(entry) => Some(self.prepare_entry(entry.clone(), &turn_id).await),
            None => None,
        };

        let classification = state.classification()?;
        let persona = state
            .persona_output
            .as_ref()
            .map(|o| o.result.clone())
            .ok_or_else(|| Error::Pipeline("persona output missing".into()))?;
        let turn = Turn {
            id: turn_id,
            session_id: session_id.to_string(),
            turn_number: turn_context.turn_number,
            user_input: user_input.to_string(),
            intent: classification.intent,
            category_id: classification.category_id.clone(),
            response: persona.response,
            follow_up_questions: persona.follow_up_questions,
            entry_id: entry.as_ref().map(|e| e.id.clone()),
            created_at: Utc::now(),
        };
        // The turn goes first so a rejected turn leaves no entry behind
        let turn = self.repos.sessions.add_turn(turn).await?;

        let entry = match entry {
            Some(entry) => Some(self.repos.knowledge.save(entry).await?),
            None => None,
        };
        if let Some(entry) = &entry {
            self.record_field_stats(&domain, &state, entry, previous_entry.as_ref()).await;
            session.current_entry_id = entry.follow_up.as_ref().map(|_| entry.id.clone());
        }

        session.turn_count = turn.turn_number;
        session.updated_at = Utc::now();
        self.repos.sessions.update(session).await?;

        let entry = match entry {
            Some(entry) => Some(self.enrich(entry).await),
            None => None,
        };

        info!(
            session_id,
            turn = turn.turn_number,
            intent = %turn.intent,
            category = %turn.category_id,
            entry_id = turn.entry_id.as_deref().unwrap_or("-"),
            "Turn processed"
        );
        Ok(TurnOutcome { turn, entry, state })
    }

    async fn run_with_timeout(
        &self,
        pipeline: &Pipeline,
        input: AgentInput,
        options: RunOptions,
    ) -> Result<PipelineState, Error> {
        let run = pipeline.run(input, options);
        match self.turn_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| ProviderError::Timeout(format!("turn exceeded {}s", limit.as_secs())))?,
            None => run.await,
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the session's lock once no turn holds or awaits it.
    async fn release_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(session_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(session_id);
        }
    }

    async fn load_session(&self, session_id: &str) -> Result<Session, Error> {
        self.repos
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))
    }

    /// The active version of the session's domain. Sessions follow the
    /// domain by name, so an evolved schema applies from the next turn on.
    async fn active_domain(&self, session: &mut Session) -> Result<Arc<DomainSchema>, Error> {
        let pinned = self
            .repos
            .schemas
            .get_domain(&session.domain_schema_id)
            .await?
            .ok_or_else(|| Error::not_found("domain schema", &session.domain_schema_id))?;
        if pinned.is_active {
            return Ok(Arc::new(pinned));
        }

        let active = self
            .repos
            .schemas
            .get_active_domain(&pinned.name)
            .await?
            .ok_or_else(|| Error::not_found("domain", &pinned.name))?;
        debug!(
            session_id = %session.id,
            from = pinned.version,
            to = active.version,
            "Session moved to newer domain version"
        );
        session.domain_schema_id = active.id.clone();
        Ok(Arc::new(active))
    }

    async fn voice_for(&self, session: &Session) -> Result<PersonaVoice, Error> {
        let Some(id) = &session.persona_schema_id else {
            return Ok(self.default_voice.clone());
        };
        Ok(match self.repos.schemas.get_persona(id).await? {
            Some(persona) => persona.voice,
            None => {
                warn!(persona_id = %id, "Persona schema missing, using default voice");
                self.default_voice.clone()
            }
        })
    }

    /// Stamp the turn and attach an embedding when an embedder is wired.
    async fn prepare_entry(&self, mut entry: KnowledgeEntry, turn_id: &str) -> KnowledgeEntry {
        entry.turn_id = Some(turn_id.to_string());
        if let Some(embedder) = &self.deps.embedder {
            match embedder.generate_embedding(&entry.embedding_text()).await {
                Ok(vector) => {
                    entry.embedding = Some(vector);
                    entry.embedding_model = Some(embedder.model().to_string());
                    entry.embedding_generated_at = Some(Utc::now());
                }
                Err(e) => warn!(entry_id = %entry.id, error = %e, "Entry embedding failed, saving without vector"),
            }
        }
        entry
    }

    /// `times_asked` for every gap the reply asked about; `times_answered`
    /// for fields asked last turn that the merged entry now fills.
    async fn record_field_stats(
        &self,
        domain: &DomainSchema,
        state: &PipelineState,
        entry: &KnowledgeEntry,
        previous: Option<&KnowledgeEntry>,
    ) {
        if is_uncategorized(&entry.category_id) {
            return;
        }
        let stats = &self.repos.field_stats;

        if let Some(gaps) = state.gaps() {
            for gap in top_gaps(&gaps.gaps) {
                if let Err(e) = stats.increment_asked(&domain.id, &entry.category_id, &gap.field).await {
                    warn!(field = %gap.field, error = %e, "Failed to record asked field");
                }
            }
        }

        let Some(previous) = previous.filter(|p| p.id == entry.id) else {
            return;
        };
        let Some(follow_up) = &previous.follow_up else {
            return;
        };
        let asked = follow_up.gaps.iter().take(MAX_PROMPT_GAPS);
        for field in asked.filter(|f| !previous.has_field(f) && entry.has_field(f)) {
            if let Err(e) = stats.increment_answered(&domain.id, &entry.category_id, field).await {
                warn!(field = %field, error = %e, "Failed to record answered field");
            }
        }
    }

    /// Enrichment never fails the turn; the stored entry is returned
    /// unchanged when it cannot run.
    async fn enrich(&self, entry: KnowledgeEntry) -> KnowledgeEntry {
        let Some(validator) = &self.enrichment else {
            return entry;
        };
        if is_uncategorized(&entry.category_id) {
            return entry;
        }
        match validator.enrich(&entry).await {
            Ok(Some(enriched)) => enriched,
            Ok(None) => entry,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Enrichment failed");
                entry
            }
        }
    }
}

/// Context for the next turn from the turns so far.
///
/// A turn is a follow-up when the last turn asked something and the
/// session still has an in-progress entry.
pub fn build_turn_context(turns: &[Turn], current_entry: Option<KnowledgeEntry>) -> TurnContext {
    let asked_questions: Vec<String> = turns
        .iter()
        .flat_map(|t| t.follow_up_questions.iter().cloned())
        .collect();
    let last_asked = turns.last().is_some_and(|t| !t.follow_up_questions.is_empty());

    TurnContext {
        turn_number: turns.len() as u32 + 1,
        is_follow_up: last_asked && current_entry.is_some(),
        previous_turns: turns.iter().map(TurnSummary::from).collect(),
        previous_entry: current_entry,
        asked_questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StructuredLlm;
    use crate::stages::context_dispatcher::RetrievalSettings;
    use crate::test_helpers::{ScriptedProvider, heritage_domain};
    use async_trait::async_trait;
    use lorekeep_core::error::StoreError;
    use lorekeep_core::schema::UNCATEGORIZED;
    use lorekeep_core::session::Intent;
    use lorekeep_core::store::SessionRepository;
    use lorekeep_store::InMemorySessionRepository;

    /// Sessions that accept everything but turns.
    struct NoTurns(InMemorySessionRepository);

    #[async_trait]
    impl SessionRepository for NoTurns {
        async fn create(&self, session: Session) -> Result<Session, StoreError> {
            self.0.create(session).await
        }

        async fn get(&self, id: &str) -> Result<Option<Session>, StoreError> {
            self.0.get(id).await
        }

        async fn update(&self, session: Session) -> Result<Session, StoreError> {
            self.0.update(session).await
        }

        async fn add_turn(&self, _turn: Turn) -> Result<Turn, StoreError> {
            Err(StoreError::Storage("turn log unavailable".into()))
        }

        async fn turns(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
            self.0.turns(session_id).await
        }
    }

    fn turn(number: u32, questions: &[&str]) -> Turn {
        Turn {
            id: format!("t{number}"),
            session_id: "s1".into(),
            turn_number: number,
            user_input: "input".into(),
            intent: Intent::Content,
            category_id: "history".into(),
            response: "reply".into(),
            follow_up_questions: questions.iter().map(|q| q.to_string()).collect(),
            entry_id: None,
            created_at: Utc::now(),
        }
    }

    async fn manager(replies: Vec<&str>) -> (SessionManager, Arc<ScriptedProvider>, Session) {
        manager_with(Repositories::in_memory(), replies).await
    }

    async fn manager_with(repos: Repositories, replies: Vec<&str>) -> (SessionManager, Arc<ScriptedProvider>, Session) {
        let provider = Arc::new(ScriptedProvider::new(replies));
        repos.schemas.create_domain(heritage_domain()).await.unwrap();
        let deps = PipelineDeps {
            llm: StructuredLlm::new(provider.clone(), "test"),
            embedder: None,
            knowledge: Some(repos.knowledge.clone()),
            retrieval: RetrievalSettings::default(),
        };
        let manager = SessionManager::new(repos, deps);
        let session = manager.start_session("heritage").await.unwrap();
        (manager, provider, session)
    }

    const CLASSIFY_HISTORY: &str = r#"{"categoryId":"history","confidence":0.9,"intent":"content"}"#;
    const GAP_SOURCES: &str =
        r#"{"gaps":[{"field":"sources","description":"No source","priority":"high"}],"followUpQuestions":["Where is this written down?"]}"#;
    const PERSONA_ASKS: &str = r#"{"response":"Lovely! Where is this written down?","followUpQuestions":["Where is this written down?"]}"#;
    const STRUCTURE_FIRST: &str = r#"{"title":"The old church","content":"Built in 1732.","structuredData":{"period":"1732"},"tags":["church"],"isComplete":false,"missingFields":["sources"]}"#;
    const GAP_NONE: &str = r#"{"gaps":[],"followUpQuestions":[]}"#;
    const PERSONA_THANKS: &str = r#"{"response":"Thank you!","followUpQuestions":[]}"#;
    const STRUCTURE_SECOND: &str = r#"{"title":"The old church","content":"Built in 1732, per the church records.","structuredData":{"sources":"church records"},"tags":["records"],"isComplete":true,"missingFields":[]}"#;

    #[test]
    fn follow_up_needs_questions_and_entry() {
        let entry = KnowledgeEntry::draft("history", "t", "c");
        let turns = vec![turn(1, &["Who built it?"])];

        let ctx = build_turn_context(&turns, Some(entry.clone()));
        assert!(ctx.is_follow_up);
        assert_eq!(ctx.turn_number, 2);
        assert_eq!(ctx.asked_questions, vec!["Who built it?"]);

        assert!(!build_turn_context(&turns, None).is_follow_up);
        assert!(!build_turn_context(&[turn(1, &[])], Some(entry)).is_follow_up);
        assert_eq!(build_turn_context(&[], None).turn_number, 1);
    }

    #[tokio::test]
    async fn follow_up_turn_completes_the_same_entry() {
        let (manager, _, session) = manager(vec![
            CLASSIFY_HISTORY, GAP_SOURCES, PERSONA_ASKS, STRUCTURE_FIRST,
            CLASSIFY_HISTORY, GAP_NONE, PERSONA_THANKS, STRUCTURE_SECOND,
        ])
        .await;

        let first = manager.process_turn(&session.id, "The old church was built in 1732").await.unwrap();
        let first_entry = first.entry.clone().unwrap();
        assert_eq!(first.is_complete(), Some(false));
        assert_eq!(manager.current_entry(&session.id).await.unwrap().unwrap().id, first_entry.id);

        let second = manager.process_turn(&session.id, "From the church records").await.unwrap();
        let second_entry = second.entry.unwrap();
        assert!(second.state.is_follow_up());
        assert_eq!(second_entry.id, first_entry.id);
        assert_eq!(second_entry.created_at, first_entry.created_at);
        assert!(second_entry.has_field("period"));
        assert!(second_entry.has_field("sources"));
        assert!(manager.current_entry(&session.id).await.unwrap().is_none());

        let stats = manager
            .repositories()
            .field_stats
            .get(&session.domain_schema_id, "history", "sources")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.times_asked, 1);
        assert_eq!(stats.times_answered, 1);

        let history = manager.history(&session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].entry_id.as_deref(), Some(first_entry.id.as_str()));
    }

    #[tokio::test]
    async fn greeting_keeps_the_current_entry() {
        let (manager, _, session) = manager(vec![
            CLASSIFY_HISTORY, GAP_SOURCES, PERSONA_ASKS, STRUCTURE_FIRST,
            r#"{"categoryId":"history","confidence":0.4,"intent":"greeting"}"#,
            r#"{"response":"Hello again!","followUpQuestions":[]}"#,
        ])
        .await;

        let first = manager.process_turn(&session.id, "The old church was built in 1732").await.unwrap();
        let greeting = manager.process_turn(&session.id, "hi there").await.unwrap();

        assert!(greeting.entry.is_none());
        assert_eq!(greeting.turn.intent, Intent::Greeting);
        assert_eq!(
            manager.current_entry(&session.id).await.unwrap().map(|e| e.id),
            first.entry.map(|e| e.id)
        );
    }

    #[tokio::test]
    async fn ended_session_rejects_turns() {
        let (manager, provider, session) = manager(vec![]).await;
        manager.end_session(&session.id).await.unwrap();
        let err = manager.process_turn(&session.id, "hello").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (manager, _, _) = manager(vec![]).await;
        let err = manager.process_turn("nope", "hello").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "session", .. }));
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn uncategorized_follow_up_extends_one_capture() {
        const CLASSIFY_MILL: &str = r#"{"categoryId":"_uncategorized","confidence":0.6,"intent":"content","suggestedCategoryLabel":"Mills","topicKeywords":["mill","grain"]}"#;
        const CLASSIFY_MILLER: &str = r#"{"categoryId":"_uncategorized","confidence":0.6,"intent":"content","topicKeywords":["miller"]}"#;
        let (manager, provider, session) = manager(vec![
            CLASSIFY_MILL,
            r#"{"gaps":[],"followUpQuestions":["Who ran the mill?"]}"#,
            r#"{"response":"Who ran the mill?","followUpQuestions":["Who ran the mill?"]}"#,
            CLASSIFY_MILLER, GAP_NONE, PERSONA_THANKS,
        ])
        .await;

        let first = manager.process_turn(&session.id, "The water mill ground grain").await.unwrap();
        let first_entry = first.entry.unwrap();
        assert!(manager.locks.lock().await.is_empty());

        let second = manager.process_turn(&session.id, "The Weber family ran it").await.unwrap();
        let second_entry = second.entry.unwrap();

        assert!(second.state.is_follow_up());
        assert_eq!(provider.calls(), 6);
        assert_eq!(second_entry.id, first_entry.id);
        assert_eq!(second_entry.created_at, first_entry.created_at);
        assert_eq!(second_entry.category_id, UNCATEGORIZED);
        assert!(second_entry.content.contains("ground grain"));
        assert!(second_entry.content.contains("Weber family"));
        assert_eq!(second_entry.topic_keywords.as_deref().unwrap(), ["mill", "grain", "miller"]);

        let captures = manager.repositories().knowledge.get_uncategorized().await.unwrap();
        assert_eq!(captures.len(), 1);
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn only_gaps_the_reply_asked_about_are_counted() {
        let (manager, _, session) = manager(vec![
            CLASSIFY_HISTORY,
            r#"{"gaps":[
                {"field":"builder","description":"Unknown builder","priority":"low"},
                {"field":"sources","description":"No source","priority":"high"},
                {"field":"architect","description":"Unknown architect","priority":"medium"},
                {"field":"period","description":"No date","priority":"high"}
            ],"followUpQuestions":["Where is this written down?"]}"#,
            PERSONA_ASKS,
            r#"{"title":"The old church","content":"It is old.","structuredData":{},"tags":[],"isComplete":false,"missingFields":[]}"#,
            CLASSIFY_HISTORY, GAP_NONE, PERSONA_THANKS,
            r#"{"title":"","content":"","structuredData":{"builder":"Hans Weber","sources":"parish records"},"tags":[],"isComplete":false,"missingFields":[]}"#,
        ])
        .await;

        manager.process_turn(&session.id, "The old church is old").await.unwrap();
        manager.process_turn(&session.id, "Hans Weber built it, says the parish record").await.unwrap();

        let stats = &manager.repositories().field_stats;
        let domain = &session.domain_schema_id;
        for field in ["sources", "period", "architect"] {
            let counted = stats.get(domain, "history", field).await.unwrap().unwrap();
            assert_eq!(counted.times_asked, 1, "{field}");
        }
        assert!(stats.get(domain, "history", "builder").await.unwrap().is_none());
        let sources = stats.get(domain, "history", "sources").await.unwrap().unwrap();
        assert_eq!(sources.times_answered, 1);
    }

    #[tokio::test]
    async fn rejected_turn_leaves_no_entry() {
        let repos = Repositories {
            sessions: Arc::new(NoTurns(InMemorySessionRepository::new())),
            ..Repositories::in_memory()
        };
        let (manager, _, session) =
            manager_with(repos, vec![CLASSIFY_HISTORY, GAP_SOURCES, PERSONA_ASKS, STRUCTURE_FIRST]).await;

        assert!(manager.process_turn(&session.id, "The old church was built in 1732").await.is_err());

        let knowledge = &manager.repositories().knowledge;
        assert!(knowledge.get_by_session(&session.id).await.unwrap().is_empty());
        assert!(manager.current_entry(&session.id).await.unwrap().is_none());
        assert!(manager.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_run_persists_nothing() {
        let (manager, _, session) = manager(vec![r#"{"categoryId":"history"}"#]).await;
        let err = manager.process_turn(&session.id, "x").await.unwrap_err();
        assert!(err.is_validation());
        assert!(manager.history(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_follows_newly_activated_domain() {
        let (manager, _, session) = manager(vec![
            r#"{"categoryId":"mills","confidence":0.9,"intent":"greeting"}"#,
            r#"{"response":"Hi!","followUpQuestions":[]}"#,
        ])
        .await;
        let schemas = &manager.repositories().schemas;
        let current = schemas.get_domain(&session.domain_schema_id).await.unwrap().unwrap();
        let mut next = current.next_version();
        next.categories.push(lorekeep_core::schema::Category::new("mills", "Mills"));
        let next = schemas.save_and_activate_domain(next).await.unwrap();

        let outcome = manager.process_turn(&session.id, "hello").await.unwrap();
        assert_eq!(outcome.turn.category_id, "mills");
        let stored = manager.repositories().sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.domain_schema_id, next.id);
    }
}
