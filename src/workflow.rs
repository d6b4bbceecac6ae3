//! # Feature: Configuration Workflow
//!
//! Multi-step operator dialogs (`/config`) modelled as an explicit state
//! machine. A [`Session`] holds the current step, the stat being built and a
//! snapshot of the guild taken when the dialog started. External inputs
//! (selections, page turns, free-text replies, timeouts) drive it forward.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Replace recursive prompt handling with resumable sessions
//! - 1.1.0: Role permission management
//! - 1.0.0: Add/delete stats and default leaderboard selection

use crate::metrics::{CounterColumn, MetricKind, Scope, MAX_DIE_SIDES};
use dashmap::DashMap;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Options shown per page of a selection
pub const PAGE_SIZE: usize = 9;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("Invalid regex"));

/// Guild data a dialog chooses from, captured when it starts
#[derive(Debug, Clone, Default)]
pub struct GuildSnapshot {
    pub categories: Vec<(u64, String)>,
    pub text_channels: Vec<(u64, String)>,
    pub roles: Vec<(u64, String)>,
    pub config_roles: Vec<u64>,
    /// Tracked stats with their descriptions, in column order
    pub metrics: Vec<(CounterColumn, String)>,
}

impl GuildSnapshot {
    fn role_name(&self, role_id: u64) -> String {
        self.roles
            .iter()
            .find(|(id, _)| *id == role_id)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| role_id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepId {
    Root,
    ManageStats,
    ChooseKind,
    DieSides,
    DieTarget,
    ChooseScope,
    ChooseCategory,
    ChooseChannel,
    DeleteStat,
    ChangeDefault,
    ManagePermissions,
    PermitRole,
    RevokeRole,
    /// A text prompt could not be shown; offers to reopen it
    Retry,
}

/// The stat being assembled by an "add stat" dialog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub kind: Option<MetricKind>,
    pub sides: Option<u64>,
}

/// Change requested by a finished dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddMetric { kind: MetricKind, scope: Scope },
    DeleteMetric(CounterColumn),
    SetDefault(CounterColumn),
    AddConfigRole(u64),
    RemoveConfigRole(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Commit(Action),
    /// Nothing to change; tell the operator why
    Message(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub title: String,
    pub options: Vec<String>,
    pub offset: usize,
}

impl Selection {
    fn new(title: impl Into<String>, options: Vec<String>) -> Self {
        Selection {
            title: title.into(),
            options,
            offset: 0,
        }
    }

    /// Options on the current page with their absolute indexes
    pub fn page(&self) -> impl Iterator<Item = (usize, &String)> {
        self.options
            .iter()
            .enumerate()
            .skip(self.offset)
            .take(PAGE_SIZE)
    }

    pub fn has_next_page(&self) -> bool {
        self.offset + PAGE_SIZE < self.options.len()
    }

    pub fn has_previous_page(&self) -> bool {
        self.offset > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPrompt {
    pub description: String,
    pub help: String,
    /// Previous input that failed validation, echoed back to the operator
    pub rejected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    AwaitingSelection(Selection),
    AwaitingText(TextPrompt),
    Terminal(Outcome),
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Terminal(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Back,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Select(usize),
    Page(PageDirection),
    Text(String),
    /// The platform refused to show the current text prompt
    PromptFailed,
    Timeout { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A new state was entered
    Advanced,
    /// Same selection, different page
    Repaged,
    /// Text input failed validation; the prompt is shown again
    Rejected,
    /// Input does not apply to the current state
    Ignored,
}

/// Validation for a free-text step: a pattern to search for and a range check
struct TextRule {
    pattern: &'static Lazy<Regex>,
    check: fn(u64, &Draft) -> bool,
}

static SIDES_RULE: TextRule = TextRule {
    pattern: &DIGITS,
    check: |value, _| (1..=MAX_DIE_SIDES).contains(&value),
};

static TARGET_RULE: TextRule = TextRule {
    pattern: &DIGITS,
    check: |value, draft| draft.sides.is_some_and(|sides| (1..=sides).contains(&value)),
};

impl TextRule {
    fn parse(&self, input: &str, draft: &Draft) -> Option<u64> {
        let lowered = input.to_lowercase();
        let found = self.pattern.find(&lowered)?;
        let value = found.as_str().parse::<u64>().ok()?;
        (self.check)(value, draft).then_some(value)
    }
}

/// One running configuration dialog
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    step: StepId,
    retry_step: Option<StepId>,
    draft: Draft,
    snapshot: GuildSnapshot,
    state: State,
    generation: u64,
}

impl Session {
    /// Start at the root configuration menu
    pub fn start(
        id: String,
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        snapshot: GuildSnapshot,
    ) -> Self {
        let mut session = Session {
            id,
            guild_id,
            channel_id,
            user_id,
            step: StepId::Root,
            retry_step: None,
            draft: Draft::default(),
            snapshot,
            state: State::Terminal(Outcome::Cancelled),
            generation: 0,
        };
        session.enter(StepId::Root);
        session
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn step(&self) -> StepId {
        self.step
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Bumped on every state entry; timeouts for older generations are stale
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&mut self, input: Input) -> Transition {
        if self.state.is_terminal() {
            return Transition::Ignored;
        }

        match input {
            Input::Timeout { generation } => {
                if generation != self.generation {
                    return Transition::Ignored;
                }
                self.finish(Outcome::Cancelled);
                Transition::Advanced
            }
            Input::Page(direction) => self.turn_page(direction),
            Input::Select(index) => self.select(index),
            Input::Text(text) => self.submit_text(text),
            Input::PromptFailed => {
                if !matches!(self.state, State::AwaitingText(_)) {
                    return Transition::Ignored;
                }
                self.retry_step = Some(self.step);
                self.enter(StepId::Retry);
                Transition::Advanced
            }
        }
    }

    fn turn_page(&mut self, direction: PageDirection) -> Transition {
        let State::AwaitingSelection(selection) = &mut self.state else {
            return Transition::Ignored;
        };

        match direction {
            PageDirection::Forward if selection.has_next_page() => selection.offset += PAGE_SIZE,
            PageDirection::Back if selection.has_previous_page() => {
                selection.offset = selection.offset.saturating_sub(PAGE_SIZE)
            }
            _ => return Transition::Ignored,
        }
        Transition::Repaged
    }

    fn select(&mut self, index: usize) -> Transition {
        let State::AwaitingSelection(selection) = &self.state else {
            return Transition::Ignored;
        };
        if index >= selection.options.len() {
            return Transition::Ignored;
        }

        match (self.step, index) {
            (StepId::Root, 0) => self.enter(StepId::ManageStats),
            (StepId::Root, 1) => self.enter(StepId::ChangeDefault),
            (StepId::Root, _) => self.enter(StepId::ManagePermissions),

            (StepId::ManageStats, 0) => self.enter(StepId::ChooseKind),
            (StepId::ManageStats, _) => self.enter(StepId::DeleteStat),

            (StepId::ChooseKind, 0) => {
                self.draft.kind = Some(MetricKind::MessageCount);
                self.enter(StepId::ChooseScope);
            }
            (StepId::ChooseKind, _) => self.enter(StepId::DieSides),

            (StepId::ChooseScope, 0) => self.commit_metric(Scope::Guild),
            (StepId::ChooseScope, 1) => self.enter(StepId::ChooseCategory),
            (StepId::ChooseScope, _) => self.enter(StepId::ChooseChannel),

            (StepId::ChooseCategory, i) => {
                let id = self.snapshot.categories[i].0;
                self.commit_metric(Scope::Category(id));
            }
            (StepId::ChooseChannel, i) => {
                let id = self.snapshot.text_channels[i].0;
                self.commit_metric(Scope::Channel(id));
            }
            (StepId::DeleteStat, i) => {
                let column = self.snapshot.metrics[i].0;
                self.finish(Outcome::Commit(Action::DeleteMetric(column)));
            }
            (StepId::ChangeDefault, i) => {
                let column = self.snapshot.metrics[i].0;
                self.finish(Outcome::Commit(Action::SetDefault(column)));
            }

            (StepId::ManagePermissions, 0) => self.enter(StepId::PermitRole),
            (StepId::ManagePermissions, _) => self.enter(StepId::RevokeRole),
            (StepId::PermitRole, i) => {
                let role = self.snapshot.roles[i].0;
                self.finish(Outcome::Commit(Action::AddConfigRole(role)));
            }
            (StepId::RevokeRole, i) => {
                let role = self.snapshot.config_roles[i];
                self.finish(Outcome::Commit(Action::RemoveConfigRole(role)));
            }

            (StepId::Retry, _) => {
                let step = self.retry_step.take().unwrap_or(StepId::DieSides);
                self.enter(step);
            }

            (StepId::DieSides | StepId::DieTarget, _) => return Transition::Ignored,
        }
        Transition::Advanced
    }

    fn submit_text(&mut self, text: String) -> Transition {
        if !matches!(self.state, State::AwaitingText(_)) {
            return Transition::Ignored;
        }

        let rule = match self.step {
            StepId::DieSides => &SIDES_RULE,
            StepId::DieTarget => &TARGET_RULE,
            _ => return Transition::Ignored,
        };

        let Some(value) = rule.parse(&text, &self.draft) else {
            self.enter(self.step);
            if let State::AwaitingText(prompt) = &mut self.state {
                prompt.rejected = Some(text);
            }
            return Transition::Rejected;
        };

        match self.step {
            StepId::DieSides => {
                self.draft.sides = Some(value);
                self.enter(StepId::DieTarget);
            }
            _ => {
                let sides = self.draft.sides.unwrap_or(value);
                match MetricKind::dice(sides, value) {
                    Ok(kind) => {
                        self.draft.kind = Some(kind);
                        self.enter(StepId::ChooseScope);
                    }
                    Err(e) => self.finish(Outcome::Message(e.to_string())),
                }
            }
        }
        Transition::Advanced
    }

    fn commit_metric(&mut self, scope: Scope) {
        match self.draft.kind {
            Some(kind) => self.finish(Outcome::Commit(Action::AddMetric { kind, scope })),
            None => self.finish(Outcome::Message("No stat type was chosen.".to_string())),
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.generation += 1;
        self.state = State::Terminal(outcome);
    }

    /// Build and enter the state for `step`
    fn enter(&mut self, step: StepId) {
        self.step = step;
        self.generation += 1;
        let snapshot = &self.snapshot;

        let metric_names = || snapshot.metrics.iter().map(|(_, d)| d.clone()).collect::<Vec<_>>();

        self.state = match step {
            StepId::Root => State::AwaitingSelection(Selection::new(
                "Configuration Options:",
                vec![
                    "Manage tracked stats".to_string(),
                    "Change default leaderboard".to_string(),
                    "Change who can alter configuration options".to_string(),
                ],
            )),
            StepId::ManageStats => State::AwaitingSelection(Selection::new(
                "Manage Tracked Stats:",
                vec!["Track a new stat".to_string(), "Delete a tracked stat".to_string()],
            )),
            StepId::ChooseKind => State::AwaitingSelection(Selection::new(
                "Select Stat Type:",
                vec!["Total messages".to_string(), "Dice roll".to_string()],
            )),
            StepId::DieSides => State::AwaitingText(TextPrompt {
                description: "Enter the number of sides on the die.".to_string(),
                help: format!("Enter a whole number between 1 and {MAX_DIE_SIDES}"),
                rejected: None,
            }),
            StepId::DieTarget => {
                let sides = self.draft.sides.unwrap_or(1);
                State::AwaitingText(TextPrompt {
                    description: format!("Enter the target value to track for a d{sides}."),
                    help: format!("Enter a whole number between 1 and {sides}"),
                    rejected: None,
                })
            }
            StepId::ChooseScope => State::AwaitingSelection(Selection::new(
                "Select where the stat is tracked:",
                vec![
                    "Track across entire server".to_string(),
                    "Track only in a category of channels".to_string(),
                    "Track only in one channel".to_string(),
                ],
            )),
            StepId::ChooseCategory if snapshot.categories.is_empty() => State::Terminal(Outcome::Message(
                "This server has no categories to track a stat in.".to_string(),
            )),
            StepId::ChooseCategory => State::AwaitingSelection(Selection::new(
                "Select the category you would like this stat to be tracked in:",
                names(&snapshot.categories),
            )),
            StepId::ChooseChannel if snapshot.text_channels.is_empty() => State::Terminal(Outcome::Message(
                "This server has no text channels to track a stat in.".to_string(),
            )),
            StepId::ChooseChannel => State::AwaitingSelection(Selection::new(
                "Select the channel you would like this stat to be tracked in:",
                names(&snapshot.text_channels),
            )),
            StepId::DeleteStat if snapshot.metrics.is_empty() => State::Terminal(Outcome::Message(
                "There are no stats currently being tracked, you cannot delete a stat.".to_string(),
            )),
            StepId::DeleteStat => State::AwaitingSelection(Selection::new(
                "Select which stat to delete:",
                metric_names(),
            )),
            StepId::ChangeDefault if snapshot.metrics.is_empty() => State::Terminal(Outcome::Message(
                "Cannot change default leaderboard when no stats are tracked. Add a stat first!".to_string(),
            )),
            StepId::ChangeDefault => State::AwaitingSelection(Selection::new(
                "Select which stat you would like to be shown in the default leaderboard:",
                metric_names(),
            )),
            StepId::ManagePermissions => State::AwaitingSelection(Selection::new(
                "Manage who can configure bot settings:",
                vec!["Permit a role".to_string(), "Remove a role's permission".to_string()],
            )),
            StepId::PermitRole if snapshot.roles.is_empty() => State::Terminal(Outcome::Message(
                "This server has no roles to permit.".to_string(),
            )),
            StepId::PermitRole => State::AwaitingSelection(Selection::new(
                "Select which role you would like to give permissions.",
                names(&snapshot.roles),
            )),
            StepId::RevokeRole if snapshot.config_roles.is_empty() => State::Terminal(Outcome::Message(
                "No roles have been granted permissions to alter bot settings. Cannot remove a role's permission."
                    .to_string(),
            )),
            StepId::RevokeRole => State::AwaitingSelection(Selection::new(
                "Select a role to remove their bot configuration permissions.",
                snapshot.config_roles.iter().map(|r| snapshot.role_name(*r)).collect(),
            )),
            StepId::Retry => {
                let label = match self.retry_step {
                    Some(StepId::DieTarget) => "Retry: enter target value",
                    _ => "Retry: enter number of sides",
                };
                State::AwaitingSelection(Selection::new(
                    "Could not open the prompt. Try again:",
                    vec![label.to_string()],
                ))
            }
        };
    }
}

/// Result of feeding an input to a session
#[derive(Debug, Clone)]
pub struct Update {
    pub session_id: String,
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub transition: Transition,
    pub state: State,
    pub generation: u64,
}

/// Owns every in-flight dialog, independent per interaction
#[derive(Clone)]
pub struct WorkflowManager {
    sessions: Arc<DashMap<String, Session>>,
    text_routes: Arc<DashMap<(u64, u64), String>>,
    prompt_timeout: Duration,
    selection_timeout: Duration,
}

impl WorkflowManager {
    pub fn new(prompt_timeout: Duration, selection_timeout: Duration) -> Self {
        WorkflowManager {
            sessions: Arc::new(DashMap::new()),
            text_routes: Arc::new(DashMap::new()),
            prompt_timeout,
            selection_timeout,
        }
    }

    /// Begin a dialog and return its first state
    pub fn start(
        &self,
        guild_id: u64,
        channel_id: u64,
        user_id: u64,
        snapshot: GuildSnapshot,
    ) -> Update {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Session::start(id.clone(), guild_id, channel_id, user_id, snapshot);
        let update = snapshot_update(&session, Transition::Advanced);
        self.sessions.insert(id, session);
        debug!("Started config session {} for user {user_id} in guild {guild_id}", update.session_id);
        update
    }

    /// Feed an input to a session. `None` when the session no longer exists.
    pub fn apply(&self, session_id: &str, input: Input) -> Option<Update> {
        let update = {
            let mut session = self.sessions.get_mut(session_id)?;
            let transition = session.handle(input);
            snapshot_update(&session, transition)
        };

        let route = (update.channel_id, update.user_id);
        match &update.state {
            State::AwaitingText(_) => {
                self.text_routes.insert(route, update.session_id.clone());
            }
            State::Terminal(_) => {
                self.sessions.remove(session_id);
                self.text_routes.remove_if(&route, |_, id| id == session_id);
            }
            State::AwaitingSelection(_) => {
                self.text_routes.remove_if(&route, |_, id| id == session_id);
            }
        }

        Some(update)
    }

    /// Session waiting for free text from this user in this channel
    pub fn text_session(&self, channel_id: u64, user_id: u64) -> Option<String> {
        self.text_routes.get(&(channel_id, user_id)).map(|id| id.clone())
    }

    /// User who started the session
    pub fn session_user(&self, session_id: &str) -> Option<u64> {
        self.sessions.get(session_id).map(|s| s.user_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn timeout_for(&self, state: &State) -> Duration {
        match state {
            State::AwaitingText(_) => self.prompt_timeout,
            _ => self.selection_timeout,
        }
    }

    /// Cancel the session if it is still in `update`'s state when the window
    /// closes, then run `on_expire` with the cancelled update.
    pub fn arm_timeout<F, Fut>(&self, update: &Update, on_expire: F)
    where
        F: FnOnce(Update) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if update.state.is_terminal() {
            return;
        }

        let manager = self.clone();
        let session_id = update.session_id.clone();
        let generation = update.generation;
        let window = self.timeout_for(&update.state);

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(expired) = manager.apply(&session_id, Input::Timeout { generation }) {
                if expired.transition == Transition::Advanced {
                    debug!("Config session {session_id} timed out");
                    on_expire(expired).await;
                }
            }
        });
    }
}

fn names(items: &[(u64, String)]) -> Vec<String> {
    items.iter().map(|(_, name)| name.clone()).collect()
}

fn snapshot_update(session: &Session, transition: Transition) -> Update {
    Update {
        session_id: session.id.clone(),
        guild_id: session.guild_id,
        channel_id: session.channel_id,
        user_id: session.user_id,
        transition,
        state: session.state().clone(),
        generation: session.generation(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(n: usize) -> CounterColumn {
        CounterColumn::new(n).unwrap()
    }

    fn snapshot() -> GuildSnapshot {
        GuildSnapshot {
            categories: vec![(77, "games".to_string()), (78, "chat".to_string())],
            text_channels: vec![(42, "dice".to_string()), (43, "general".to_string())],
            roles: vec![(5, "mods".to_string()), (6, "admins".to_string())],
            config_roles: vec![6],
            metrics: vec![
                (col(1), "Total messages server-wide".to_string()),
                (col(2), "6's rolled by d6 server-wide".to_string()),
            ],
        }
    }

    fn session() -> Session {
        Session::start("s".to_string(), 1, 42, 9, snapshot())
    }

    fn outcome(session: &Session) -> &Outcome {
        match session.state() {
            State::Terminal(outcome) => outcome,
            other => panic!("expected terminal state, got {other:?}"),
        }
    }

    #[test]
    fn test_add_message_count_channel_flow() {
        let mut s = session();
        assert_eq!(s.handle(Input::Select(0)), Transition::Advanced);
        assert_eq!(s.handle(Input::Select(0)), Transition::Advanced);
        assert_eq!(s.handle(Input::Select(0)), Transition::Advanced);
        assert_eq!(s.step(), StepId::ChooseScope);
        s.handle(Input::Select(2));
        s.handle(Input::Select(0));

        assert_eq!(
            outcome(&s),
            &Outcome::Commit(Action::AddMetric {
                kind: MetricKind::MessageCount,
                scope: Scope::Channel(42)
            })
        );
    }

    #[test]
    fn test_dice_flow_reprompts_and_echoes_invalid_input() {
        let mut s = session();
        s.handle(Input::Select(0));
        s.handle(Input::Select(0));
        s.handle(Input::Select(1));
        assert_eq!(s.step(), StepId::DieSides);

        let before = s.generation();
        assert_eq!(s.handle(Input::Text("lots".to_string())), Transition::Rejected);
        assert!(s.generation() > before);
        match s.state() {
            State::AwaitingText(prompt) => assert_eq!(prompt.rejected.as_deref(), Some("lots")),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(s.handle(Input::Text("0".to_string())), Transition::Rejected);
        assert_eq!(s.handle(Input::Text("99999999999".to_string())), Transition::Rejected);

        assert_eq!(s.handle(Input::Text("a d6 please".to_string())), Transition::Advanced);
        assert_eq!(s.step(), StepId::DieTarget);
        match s.state() {
            State::AwaitingText(prompt) => assert!(prompt.rejected.is_none()),
            other => panic!("unexpected state {other:?}"),
        }

        assert_eq!(s.handle(Input::Text("7".to_string())), Transition::Rejected);
        assert_eq!(s.handle(Input::Text("6".to_string())), Transition::Advanced);
        assert_eq!(s.draft().kind, Some(MetricKind::DiceRoll { sides: 6, target: 6 }));

        s.handle(Input::Select(1));
        s.handle(Input::Select(0));
        assert_eq!(
            outcome(&s),
            &Outcome::Commit(Action::AddMetric {
                kind: MetricKind::DiceRoll { sides: 6, target: 6 },
                scope: Scope::Category(77)
            })
        );
    }

    #[test]
    fn test_text_ignored_while_selecting() {
        let mut s = session();
        assert_eq!(s.handle(Input::Text("1".to_string())), Transition::Ignored);
        assert_eq!(s.handle(Input::Select(3)), Transition::Ignored);
        assert_eq!(s.step(), StepId::Root);
    }

    #[test]
    fn test_timeout_cancels_only_current_generation() {
        let mut s = session();
        let stale = s.generation();
        s.handle(Input::Select(0));

        assert_eq!(s.handle(Input::Timeout { generation: stale }), Transition::Ignored);
        assert!(!s.state().is_terminal());

        let current = s.generation();
        assert_eq!(s.handle(Input::Timeout { generation: current }), Transition::Advanced);
        assert_eq!(outcome(&s), &Outcome::Cancelled);
        assert_eq!(s.handle(Input::Select(0)), Transition::Ignored);
    }

    #[test]
    fn test_pagination_keeps_step() {
        let mut snap = snapshot();
        snap.text_channels = (0..20).map(|i| (100 + i, format!("channel-{i}"))).collect();
        let mut s = Session::start("p".to_string(), 1, 42, 9, snap);
        s.handle(Input::Select(0));
        s.handle(Input::Select(0));
        s.handle(Input::Select(0));
        s.handle(Input::Select(2));
        assert_eq!(s.step(), StepId::ChooseChannel);

        let generation = s.generation();
        assert_eq!(s.handle(Input::Page(PageDirection::Back)), Transition::Ignored);
        assert_eq!(s.handle(Input::Page(PageDirection::Forward)), Transition::Repaged);
        assert_eq!(s.handle(Input::Page(PageDirection::Forward)), Transition::Repaged);
        assert_eq!(s.handle(Input::Page(PageDirection::Forward)), Transition::Ignored);
        assert_eq!(s.generation(), generation);

        match s.state() {
            State::AwaitingSelection(sel) => {
                assert_eq!(sel.offset, 18);
                let page: Vec<usize> = sel.page().map(|(i, _)| i).collect();
                assert_eq!(page, vec![18, 19]);
                assert!(!sel.has_next_page());
                assert!(sel.has_previous_page());
            }
            other => panic!("unexpected state {other:?}"),
        }

        s.handle(Input::Select(19));
        assert_eq!(
            outcome(&s),
            &Outcome::Commit(Action::AddMetric {
                kind: MetricKind::MessageCount,
                scope: Scope::Channel(119)
            })
        );
    }

    #[test]
    fn test_delete_and_default_flows() {
        let mut s = session();
        s.handle(Input::Select(0));
        s.handle(Input::Select(1));
        s.handle(Input::Select(1));
        assert_eq!(outcome(&s), &Outcome::Commit(Action::DeleteMetric(col(2))));

        let mut s = session();
        s.handle(Input::Select(1));
        s.handle(Input::Select(0));
        assert_eq!(outcome(&s), &Outcome::Commit(Action::SetDefault(col(1))));
    }

    #[test]
    fn test_empty_metrics_end_with_message() {
        let mut snap = snapshot();
        snap.metrics.clear();

        let mut s = Session::start("e".to_string(), 1, 42, 9, snap.clone());
        s.handle(Input::Select(0));
        s.handle(Input::Select(1));
        assert!(matches!(outcome(&s), Outcome::Message(m) if m.contains("cannot delete")));

        let mut s = Session::start("e".to_string(), 1, 42, 9, snap);
        s.handle(Input::Select(1));
        assert!(matches!(outcome(&s), Outcome::Message(m) if m.contains("Add a stat first")));
    }

    #[test]
    fn test_prompt_failure_offers_retry() {
        let mut s = session();
        s.handle(Input::Select(0));
        s.handle(Input::Select(0));
        s.handle(Input::Select(1));

        assert_eq!(s.handle(Input::PromptFailed), Transition::Advanced);
        assert_eq!(s.step(), StepId::Retry);
        match s.state() {
            State::AwaitingSelection(sel) => assert_eq!(sel.options.len(), 1),
            other => panic!("unexpected state {other:?}"),
        }

        s.handle(Input::Select(0));
        assert_eq!(s.step(), StepId::DieSides);
        assert!(matches!(s.state(), State::AwaitingText(_)));

        let mut selecting = session();
        assert_eq!(selecting.handle(Input::PromptFailed), Transition::Ignored);
    }

    #[test]
    fn test_permission_flows() {
        let mut s = session();
        s.handle(Input::Select(2));
        s.handle(Input::Select(0));
        s.handle(Input::Select(0));
        assert_eq!(outcome(&s), &Outcome::Commit(Action::AddConfigRole(5)));

        let mut s = session();
        s.handle(Input::Select(2));
        s.handle(Input::Select(1));
        match s.state() {
            State::AwaitingSelection(sel) => assert_eq!(sel.options, vec!["admins".to_string()]),
            other => panic!("unexpected state {other:?}"),
        }
        s.handle(Input::Select(0));
        assert_eq!(outcome(&s), &Outcome::Commit(Action::RemoveConfigRole(6)));
    }

    #[test]
    fn test_manager_routes_text_and_cleans_up() {
        let manager = WorkflowManager::new(Duration::from_secs(30), Duration::from_secs(60));
        let start = manager.start(1, 42, 9, snapshot());
        let id = start.session_id.clone();

        manager.apply(&id, Input::Select(0));
        manager.apply(&id, Input::Select(0));
        assert_eq!(manager.text_session(42, 9), None);

        let update = manager.apply(&id, Input::Select(1)).unwrap();
        assert!(matches!(update.state, State::AwaitingText(_)));
        assert_eq!(manager.timeout_for(&update.state), Duration::from_secs(30));
        assert_eq!(manager.text_session(42, 9), Some(id.clone()));

        manager.apply(&id, Input::Timeout { generation: update.generation });
        assert_eq!(manager.text_session(42, 9), None);
        assert_eq!(manager.active_sessions(), 0);
        assert!(manager.apply(&id, Input::Select(0)).is_none());
    }

    #[tokio::test]
    async fn test_armed_timeout_cancels_idle_session() {
        let manager = WorkflowManager::new(Duration::from_millis(20), Duration::from_millis(20));
        let start = manager.start(1, 42, 9, snapshot());

        let (tx, rx) = tokio::sync::oneshot::channel();
        manager.arm_timeout(&start, move |update| async move {
            let _ = tx.send(update.state);
        });

        let state = tokio::time::timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
        assert_eq!(state, State::Terminal(Outcome::Cancelled));
        assert_eq!(manager.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_armed_timeout_ignored_after_progress() {
        let manager = WorkflowManager::new(Duration::from_millis(20), Duration::from_millis(20));
        let start = manager.start(1, 42, 9, snapshot());

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        manager.arm_timeout(&start, move |_| async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        manager.apply(&start.session_id, Input::Select(0));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(manager.active_sessions(), 1);
    }
}
