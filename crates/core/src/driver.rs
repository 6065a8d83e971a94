//! Session Driver
//!
//! Runs one HealthBot conversation. Each call to [`SessionDriver::handle_turn`] feeds
//! the user's message to the stage that is waiting for it, then keeps routing and
//! running automatic stages until the dialogue needs the user again.

use crate::{
    AgentOutput, InputMode,
    error::PortError,
    llm_client::LLMClient,
    parsing,
    prompts::Prompts,
    router::{Stage, route},
    search::SearchService,
    session_state::{Role, SYSTEM_PERSONA, SessionSettings, SessionState},
    stages::{self, Reply, StageContext, TOPIC_PROMPT, Transition},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Span, debug, info, instrument, warn};

/// Upper bound on the stages a single turn may run.
pub const MAX_STAGES_PER_TURN: usize = 64;

#[derive(Debug, Error)]
pub enum TurnError {
    /// A completion call failed. The session resumes at `stage` on the next turn.
    #[error("stage '{stage}' failed: {source}")]
    Capability {
        stage: Stage,
        #[source]
        source: PortError,
    },
    #[error("the conversation has already ended")]
    SessionEnded,
    #[error("dialogue did not reach a waiting stage within {0} stages")]
    Stalled(usize),
}

/// Owns the state of one conversation and the ports its stages call.
pub struct SessionDriver {
    llm: Arc<dyn LLMClient>,
    search: Arc<dyn SearchService>,
    prompts: Arc<Prompts>,
    settings: SessionSettings,
    state: SessionState,
    finished: bool,
    /// Replies from a failed turn, sent ahead of the next successful output.
    undelivered: Vec<Reply>,
}

impl SessionDriver {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        search: Arc<dyn SearchService>,
        prompts: Arc<Prompts>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            llm,
            search,
            prompts,
            state: Self::opening_state(&settings),
            settings,
            finished: false,
            undelivered: Vec::new(),
        }
    }

    fn opening_state(settings: &SessionSettings) -> SessionState {
        let mut state = SessionState::new(settings);
        state.record(Role::System, SYSTEM_PERSONA);
        state.record(Role::Assistant, TOPIC_PROMPT);
        state
    }

    /// The message shown before the user's first turn.
    pub fn initial_output(&self) -> AgentOutput {
        AgentOutput {
            message: TOPIC_PROMPT.to_string(),
            input_mode: InputMode::FreeText,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The stage the next turn will start at.
    pub fn current_stage(&self) -> Stage {
        route(&self.state)
    }

    /// Replaces the session settings. They apply from the next topic-cycle or reset.
    pub fn update_settings(&mut self, settings: SessionSettings) {
        info!(?settings, "Session settings updated");
        self.settings = settings;
    }

    /// Starts over with an empty transcript, as if the session had just been created.
    pub fn clear(&mut self) -> AgentOutput {
        info!("Clearing conversation");
        let mut state = Self::opening_state(&self.settings);
        self.apply_current_settings(&mut state);
        self.state = state;
        self.finished = false;
        self.undelivered.clear();
        self.initial_output()
    }

    fn apply_current_settings(&self, state: &mut SessionState) {
        state.apply_settings(
            self.settings.difficulty,
            self.settings.detail_level,
            self.settings.question_count,
        );
    }

    /// Processes one user message and returns everything the agent says in reply.
    #[instrument(skip_all, fields(stage = tracing::field::Empty))]
    pub async fn handle_turn(&mut self, input: &str) -> Result<AgentOutput, TurnError> {
        if self.finished {
            return Err(TurnError::SessionEnded);
        }

        if parsing::is_reset_command(input) {
            info!("Reset requested");
            let mut state = self.state.reset(true);
            self.apply_current_settings(&mut state);
            state.record(Role::User, input);
            self.undelivered.clear();
            return Ok(self.commit(state, vec![Reply::text(TOPIC_PROMPT)]));
        }

        let mut state = self.state.clone();
        state.record(Role::User, input);

        let first = route(&state);
        let mut pending = if first.awaits_input(&state) {
            Some(input)
        } else {
            info!(stage = %first, "Resuming at stage that failed last turn");
            None
        };
        let mut replies: Vec<Reply> = Vec::new();

        for _ in 0..MAX_STAGES_PER_TURN {
            let stage = route(&state);
            Span::current().record("stage", tracing::field::display(stage));

            let transition = if stage.awaits_input(&state) {
                let Some(text) = pending.take() else {
                    replies.extend(stages::prompt_for(stage, &state));
                    return Ok(self.commit(state, replies));
                };
                debug!(stage = %stage, "Consuming user input");
                self.run_input_stage(stage, state, text)
            } else {
                debug!(stage = %stage, "Running stage");
                let outcome = self.run_auto_stage(stage, &state).await;
                match outcome {
                    Ok(transition) => transition,
                    Err(source) => {
                        warn!(stage = %stage, error = %source, "Stage failed");
                        self.hold(state, replies);
                        return Err(TurnError::Capability { stage, source });
                    }
                }
            };

            state = transition.state;
            replies.extend(transition.reply);

            if stage.is_terminal() {
                info!("Conversation ended");
                self.finished = true;
                return Ok(self.commit(state, replies));
            }
        }

        warn!(limit = MAX_STAGES_PER_TURN, "Turn stalled");
        self.hold(state, replies);
        Err(TurnError::Stalled(MAX_STAGES_PER_TURN))
    }

    fn run_input_stage(&self, stage: Stage, state: SessionState, input: &str) -> Transition {
        match stage {
            Stage::IntakeTopic => stages::intake_topic(state, Some(input), &self.settings),
            Stage::AskQuizReadiness => stages::ask_quiz_readiness(state, input),
            Stage::AskQuestionCount => stages::ask_question_count(state, input),
            Stage::PresentQuestion => stages::collect_answer(state, input),
            Stage::ConfirmNextQuestion => stages::confirm_next_question(state, input),
            Stage::AskNextAction => stages::ask_next_action(state, input),
            other => {
                warn!(stage = %other, "Stage does not take input");
                Transition::silent(state)
            }
        }
    }

    async fn run_auto_stage(
        &self,
        stage: Stage,
        state: &SessionState,
    ) -> Result<Transition, PortError> {
        let ctx = StageContext {
            llm: self.llm.as_ref(),
            search: self.search.as_ref(),
            prompts: &self.prompts,
            settings: &self.settings,
        };
        let state = state.clone();
        match stage {
            Stage::IntakeTopic => Ok(stages::intake_topic(state, None, &self.settings)),
            Stage::FetchInformation => Ok(stages::fetch_information(state, &ctx).await),
            Stage::Summarize => stages::summarize(state, &ctx).await,
            Stage::GenerateQuizQuestions => stages::generate_quiz_questions(state, &ctx).await,
            Stage::GradeAnswer => stages::grade_answer(state, &ctx).await,
            Stage::AdvanceOrSummarizeQuiz => {
                Ok(stages::advance_or_summarize_quiz(state, &self.settings))
            }
            Stage::SuggestRelatedTopics => stages::suggest_related_topics(state, &ctx).await,
            Stage::EndConversation => Ok(stages::end_conversation(state)),
            _ => Ok(Transition::silent(state)),
        }
    }

    fn store(&mut self, mut state: SessionState, replies: &[Reply]) {
        for reply in replies {
            state.record(Role::Assistant, reply.message.clone());
        }
        self.state = state;
    }

    /// Stores the progress of a failed turn and keeps its replies for the next output.
    fn hold(&mut self, state: SessionState, replies: Vec<Reply>) {
        self.store(state, &replies);
        if !replies.is_empty() {
            debug!(count = replies.len(), "Holding replies until the next turn");
        }
        self.undelivered.extend(replies);
    }

    /// Stores `state`, records the replies in its transcript and joins them, after any
    /// held replies, into one output.
    fn commit(&mut self, state: SessionState, replies: Vec<Reply>) -> AgentOutput {
        self.store(state, &replies);

        let replies = std::mem::take(&mut self.undelivered)
            .into_iter()
            .chain(replies)
            .collect::<Vec<_>>();
        let input_mode = replies
            .last()
            .map(|reply| reply.input_mode)
            .unwrap_or_default();
        let message = replies
            .into_iter()
            .map(|reply| reply.message)
            .collect::<Vec<_>>()
            .join("\n\n");
        AgentOutput {
            message,
            input_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::CannedLLMClient;
    use crate::search::CannedSearchService;
    use crate::session_state::{Grade, Level, NextAction};
    use crate::stages::{FAREWELL, NEXT_QUESTION_PROMPT, QUIZ_PROMPT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        llm: Arc<CannedLLMClient>,
        search: Arc<CannedSearchService>,
        driver: SessionDriver,
    }

    fn harness_with(llm: CannedLLMClient, settings: SessionSettings) -> Harness {
        let llm = Arc::new(llm);
        let search = Arc::new(CannedSearchService::new(vec![
            "Diabetes affects how the body uses glucose.".into(),
            "Type 2 diabetes is the most common form.".into(),
        ]));
        let driver = SessionDriver::new(
            llm.clone(),
            search.clone(),
            Arc::new(Prompts::default()),
            settings,
        );
        Harness {
            llm,
            search,
            driver,
        }
    }

    fn harness() -> Harness {
        harness_with(CannedLLMClient::health_demo(), SessionSettings::default())
    }

    fn calls_containing(llm: &CannedLLMClient, needle: &str) -> usize {
        llm.calls()
            .iter()
            .filter(|call| call.user_prompt.contains(needle))
            .count()
    }

    async fn run(driver: &mut SessionDriver, inputs: &[&str]) -> AgentOutput {
        let mut last = driver.initial_output();
        for input in inputs {
            last = driver.handle_turn(input).await.unwrap();
        }
        last
    }

    #[test]
    fn test_new_session_opens_with_persona_and_topic_prompt() {
        let h = harness();
        let transcript = &h.driver.state().transcript;
        assert_eq!(transcript[0].role, Role::System);
        assert_eq!(transcript[0].content, SYSTEM_PERSONA);
        assert_eq!(transcript[1].content, TOPIC_PROMPT);
        assert_eq!(h.driver.current_stage(), Stage::IntakeTopic);
        assert_eq!(h.driver.initial_output().input_mode, InputMode::FreeText);
    }

    #[tokio::test]
    async fn test_full_scenario_with_related_topic() {
        let mut h = harness();

        let out = h.driver.handle_turn("diabetes").await.unwrap();
        assert!(out.message.contains("HealthBot is running offline"));
        assert!(out.message.ends_with(QUIZ_PROMPT));
        assert_eq!(out.input_mode, InputMode::YesNo);

        let out = h.driver.handle_turn("yes").await.unwrap();
        assert_eq!(out.message, "How many questions would you like? (1-5)");

        let out = h.driver.handle_turn("1").await.unwrap();
        assert_eq!(
            out.message,
            "Question 1: What is one common symptom of this condition?"
        );

        let out = h
            .driver
            .handle_turn("Feeling very thirsty")
            .await
            .unwrap();
        assert!(out.message.starts_with("Quiz Results:"));
        assert!(out.message.contains("Score: 1/1 passed"));
        assert!(out.message.contains("You've completed all 1 questions!"));
        assert!(out.message.contains("2. Exercise and heart health"));
        assert!(out.message.ends_with("3. Exit (enter 'exit')"));
        assert_eq!(h.driver.state().quiz_records[0].grade, Grade::Pass);

        let out = h.driver.handle_turn("2").await.unwrap();
        assert!(out.message.starts_with("Here's information about Exercise and heart health:"));
        assert!(out.message.ends_with(QUIZ_PROMPT));

        let state = h.driver.state();
        assert_eq!(state.topic.as_deref(), Some("Exercise and heart health"));
        assert!(state.next_action.is_none());
        assert!(state.quiz_records.is_empty());
        assert_eq!(h.search.queries().len(), 2);
        assert_eq!(
            h.search.queries()[1],
            "Exercise and heart health patient information"
        );
        assert_eq!(calls_containing(&h.llm, "# Summarize"), 2);
        assert_eq!(state.transcript[0].content, SYSTEM_PERSONA);
    }

    #[tokio::test]
    async fn test_quiz_of_k_questions_grades_exactly_k_answers() {
        for k in 1..=5usize {
            let mut h = harness();
            let count = k.to_string();
            let mut inputs = vec!["asthma", "yes", count.as_str()];
            let answers: Vec<String> = (1..=k).map(|i| format!("answer {i}")).collect();
            inputs.extend(answers.iter().map(String::as_str));

            let out = run(&mut h.driver, &inputs).await;
            assert!(out.message.contains(&format!("Score: {k}/{k} passed")));
            assert_eq!(calls_containing(&h.llm, "# Grade Answer"), k);
            assert_eq!(h.driver.current_stage(), Stage::AskNextAction);
        }
    }

    #[tokio::test]
    async fn test_declining_quiz_skips_quiz_stages() {
        let mut h = harness();
        let out = run(&mut h.driver, &["migraine", "no"]).await;

        assert!(out.message.starts_with("You might also be interested"));
        assert_eq!(calls_containing(&h.llm, "# Generate Quiz Questions"), 0);
        assert_eq!(calls_containing(&h.llm, "# Grade Answer"), 0);
        assert!(h.driver.state().quiz_results.is_none());
    }

    #[tokio::test]
    async fn test_exit_ends_the_session() {
        let mut h = harness();
        let out = run(&mut h.driver, &["migraine", "no", "Bye"]).await;

        assert_eq!(out.message, FAREWELL);
        assert!(h.driver.is_finished());
        assert_eq!(h.driver.state().next_action, Some(NextAction::Exit));
        assert!(matches!(
            h.driver.handle_turn("hello?").await,
            Err(TurnError::SessionEnded)
        ));
    }

    #[tokio::test]
    async fn test_malformed_quiz_reply_becomes_single_question() {
        let raw = "1. What is insulin?\n2. What is glucose?";
        let llm = CannedLLMClient::new("summary")
            .respond_to("# Generate Quiz Questions", raw)
            .respond_to("# Grade Answer", "Grade: Fail\nFeedback:\n- none")
            .respond_to("# Suggest Related Topics", "no idea");
        let mut h = harness_with(llm, SessionSettings::default());

        let out = run(&mut h.driver, &["diabetes", "yes", "3"]).await;
        assert_eq!(out.message, format!("Question 1: {raw}"));
        assert_eq!(h.driver.state().requested_question_count, 1);

        let out = h.driver.handle_turn("it is a hormone").await.unwrap();
        assert!(out.message.contains("Score: 0/1 passed"));
        assert!(out.message.contains("You've completed all 1 questions!"));
        assert!(out.message.contains("1. Healthy eating and nutrition"));
    }

    /// Fails the first `failures` calls whose prompt contains `needle`.
    struct FlakyClient {
        needle: &'static str,
        failures: AtomicUsize,
        inner: CannedLLMClient,
    }

    impl FlakyClient {
        fn failing_once(needle: &'static str) -> Self {
            Self {
                needle,
                failures: AtomicUsize::new(1),
                inner: CannedLLMClient::health_demo(),
            }
        }
    }

    #[async_trait]
    impl LLMClient for FlakyClient {
        async fn complete(
            &self,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, PortError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 && user_prompt.contains(self.needle) {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(PortError::provider("HTTP 503"));
            }
            self.inner.complete(system_prompt, user_prompt).await
        }
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_progress_and_retries_on_next_input() {
        let llm = Arc::new(FlakyClient::failing_once("# Summarize"));
        let search = Arc::new(CannedSearchService::new(vec!["snippet".into()]));
        let mut driver = SessionDriver::new(
            llm,
            search.clone(),
            Arc::new(Prompts::default()),
            SessionSettings::default(),
        );

        let err = driver.handle_turn("diabetes").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::Capability {
                stage: Stage::Summarize,
                ..
            }
        ));
        assert_eq!(driver.state().topic.as_deref(), Some("diabetes"));
        assert_eq!(driver.state().search_snippets, Some(vec!["snippet".to_string()]));
        assert!(driver.state().summary_text.is_none());
        assert_eq!(driver.current_stage(), Stage::Summarize);

        let out = driver.handle_turn("please try again").await.unwrap();
        assert!(out.message.ends_with(QUIZ_PROMPT));
        assert_eq!(driver.state().topic.as_deref(), Some("diabetes"));
        assert_eq!(search.queries().len(), 1);
        assert!(
            driver
                .state()
                .transcript
                .iter()
                .any(|entry| entry.role == Role::User && entry.content == "please try again")
        );
    }

    #[tokio::test]
    async fn test_replies_before_a_failure_arrive_with_the_retry() {
        let mut driver = SessionDriver::new(
            Arc::new(FlakyClient::failing_once("# Suggest Related Topics")),
            Arc::new(CannedSearchService::new(vec!["snippet".into()])),
            Arc::new(Prompts::default()),
            SessionSettings::default(),
        );
        run(&mut driver, &["diabetes", "yes", "1"]).await;

        let err = driver.handle_turn("thirsty").await.unwrap_err();
        assert!(matches!(
            err,
            TurnError::Capability {
                stage: Stage::SuggestRelatedTopics,
                ..
            }
        ));

        let out = driver.handle_turn("retry").await.unwrap();
        assert!(out.message.starts_with("Quiz Results:"));
        assert!(out.message.contains("Score: 1/1 passed"));
        assert!(out.message.contains("2. Exercise and heart health"));
        assert!(out.message.ends_with("3. Exit (enter 'exit')"));

        let recorded = driver
            .state()
            .transcript
            .iter()
            .filter(|entry| entry.content.starts_with("Quiz Results:"))
            .count();
        assert_eq!(recorded, 1);

        let out = driver.handle_turn("exit").await.unwrap();
        assert_eq!(out.message, FAREWELL);
    }

    #[tokio::test]
    async fn test_reset_drops_replies_held_from_a_failed_turn() {
        let mut driver = SessionDriver::new(
            Arc::new(FlakyClient::failing_once("# Suggest Related Topics")),
            Arc::new(CannedSearchService::new(vec!["snippet".into()])),
            Arc::new(Prompts::default()),
            SessionSettings::default(),
        );
        run(&mut driver, &["diabetes", "yes", "1"]).await;
        assert!(driver.handle_turn("thirsty").await.is_err());

        let out = driver.handle_turn("restart").await.unwrap();
        assert_eq!(out.message, TOPIC_PROMPT);
    }

    #[tokio::test]
    async fn test_reset_command_mid_quiz() {
        let mut h = harness();
        run(&mut h.driver, &["asthma", "yes", "2"]).await;
        let before = h.driver.state().transcript.len();

        let out = h.driver.handle_turn("Restart").await.unwrap();
        assert_eq!(out.message, TOPIC_PROMPT);
        let state = h.driver.state();
        assert!(state.topic.is_none());
        assert!(state.quiz_questions.is_none());
        assert_eq!(state.transcript.len(), before + 2);
        assert_eq!(h.driver.current_stage(), Stage::IntakeTopic);
    }

    #[tokio::test]
    async fn test_pause_between_questions_allows_skipping() {
        let settings = SessionSettings {
            pause_between_questions: true,
            ..SessionSettings::default()
        };
        let mut h = harness_with(CannedLLMClient::health_demo(), settings);

        let out = run(&mut h.driver, &["asthma", "yes", "3", "first answer"]).await;
        assert_eq!(out.message, NEXT_QUESTION_PROMPT);
        assert_eq!(out.input_mode, InputMode::YesNo);

        let out = h.driver.handle_turn("yes").await.unwrap();
        assert!(out.message.starts_with("Question 2:"));

        h.driver.handle_turn("second answer").await.unwrap();
        let out = h.driver.handle_turn("no").await.unwrap();
        assert!(out.message.contains("Score: 2/2 passed"));
        assert!(out.message.contains("You answered 2 of 3 questions."));
        assert_eq!(calls_containing(&h.llm, "# Grade Answer"), 2);
    }

    #[tokio::test]
    async fn test_settings_apply_from_next_cycle() {
        let mut h = harness();
        run(&mut h.driver, &["gout"]).await;

        h.driver.update_settings(SessionSettings {
            difficulty: Level::Hard,
            detail_level: Level::Hard,
            question_count: 4,
            pause_between_questions: false,
        });
        assert_eq!(h.driver.state().difficulty, Level::Medium);

        run(&mut h.driver, &["no", "new", "lupus"]).await;
        let state = h.driver.state();
        assert_eq!(state.difficulty, Level::Hard);
        assert_eq!(state.requested_question_count, 4);
        assert_eq!(
            h.search.queries().last().map(String::as_str),
            Some("lupus detailed medical information")
        );
    }

    #[tokio::test]
    async fn test_clear_drops_transcript_and_reopens() {
        let mut h = harness();
        run(&mut h.driver, &["migraine", "no", "exit"]).await;
        assert!(h.driver.is_finished());

        let out = h.driver.clear();
        assert_eq!(out.message, TOPIC_PROMPT);
        assert!(!h.driver.is_finished());
        assert_eq!(h.driver.state().transcript.len(), 2);
        assert!(h.driver.state().topic.is_none());
    }

    #[tokio::test]
    async fn test_blank_topic_reprompts() {
        let mut h = harness();
        let out = h.driver.handle_turn("   ").await.unwrap();
        assert_eq!(out.message, TOPIC_PROMPT);
        assert!(h.search.queries().is_empty());
    }
}
