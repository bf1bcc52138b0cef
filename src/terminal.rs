//! Terminal front end: renders the transcript, shuffles choices for display,
//! and forwards the learner's picks to the engine.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::content::{ContentStore, Progress, Scenario};
use crate::game::node::{Choice, DialogueNode, Emotion, Utterance};
use crate::game::session::{Message, Role, SessionConfig, SessionState, SessionSummary, Status};
use crate::game::{Engine, HintOutcome, TurnOutcome};
use crate::remote::{
    ConversationStatus, DialogueCollaborator, RemoteChoice, RemoteConversation, RemoteTurn,
};

fn emotion_face(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Neutral => "(-_-)",
        Emotion::Happy => "(^_^)",
        Emotion::Confused => "(o_O)",
        Emotion::Angry => "(>_<)",
        Emotion::Encouraging => "(^o^)",
    }
}

/// Outcome of a single round.
enum RoundOutcome {
    Finished(SessionSummary),
    /// Player typed quit mid-conversation.
    Quit,
}

enum AfterRound {
    Restart,
    Menu,
    Quit,
}

pub struct Terminal<R, W> {
    input: R,
    output: W,
    rng: StdRng,
    shuffle: bool,
}

impl Terminal<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            rng: StdRng::from_entropy(),
            shuffle: true,
        }
    }

    /// Show choices in authored order instead of shuffling them.
    pub fn with_authored_order(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// `None` on end of input.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        write!(self.output, "> ")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_line(&mut self, prefix: &str, line: &Utterance) -> io::Result<()> {
        writeln!(self.output, "{prefix}{}", line.text)?;
        if !line.transliteration.is_empty() {
            writeln!(self.output, "      {}", line.transliteration)?;
        }
        if !line.translation.is_empty() {
            writeln!(self.output, "      = {}", line.translation)?;
        }
        Ok(())
    }

    fn render(&mut self, message: &Message) -> io::Result<()> {
        match message.role {
            Role::Npc => {
                let face = emotion_face(message.emotion.unwrap_or_default());
                self.print_line(&format!("\n[NPC {face}]: "), &message.line)
            }
            Role::User => {
                writeln!(self.output, "\n[You]: {}", message.line.text)?;
                if let Some(grade) = &message.grade {
                    if grade.damage > 0 {
                        writeln!(self.output, "  ({}, -{} HP)", grade.quality, grade.damage)?;
                    } else {
                        writeln!(self.output, "  ({})", grade.quality)?;
                    }
                    if !grade.feedback.is_empty() {
                        writeln!(self.output, "  > {}", grade.feedback)?;
                    }
                }
                Ok(())
            }
            Role::System => writeln!(self.output, "\n* {}", message.line.text),
        }
    }

    fn render_since(&mut self, state: &SessionState, from: usize) -> io::Result<usize> {
        let transcript = state.transcript();
        for message in &transcript[from.min(transcript.len())..] {
            self.render(message)?;
        }
        Ok(transcript.len())
    }

    fn display_order<'n>(&mut self, node: &'n DialogueNode) -> Vec<&'n Choice> {
        let mut order: Vec<&Choice> = node.choices.iter().collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
    }

    fn show_education(&mut self, node: &DialogueNode) -> io::Result<()> {
        let Some(education) = &node.education else {
            return writeln!(self.output, "  (No notes for this line.)");
        };
        let key = &education.key_expression;
        writeln!(self.output, "  Key expression: {} = {}", key.pattern, key.translation)?;
        writeln!(self.output, "    {}", key.explanation)?;
        for item in &education.vocabulary {
            writeln!(
                self.output,
                "  {} ({}) [{}] {}",
                item.word, item.reading, item.transliteration, item.meaning
            )?;
        }
        Ok(())
    }

    /// Returns `false` on end of input.
    fn kanji_quiz(&mut self, node: &DialogueNode) -> io::Result<bool> {
        let Some(challenge) = node
            .education
            .as_ref()
            .and_then(|e| e.kanji_challenge.as_ref())
        else {
            writeln!(self.output, "  (No kanji challenge here.)")?;
            return Ok(true);
        };

        let mut options = challenge.options();
        options.shuffle(&mut self.rng);
        writeln!(self.output, "  How do you read {}?", challenge.kanji)?;
        for (i, option) in options.iter().enumerate() {
            writeln!(self.output, "    {}. {}", i + 1, option)?;
        }

        let Some(answer) = self.read_line()? else {
            return Ok(false);
        };
        let picked = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| options.get(i).copied())
            .unwrap_or(answer.as_str());

        if challenge.is_correct(picked) {
            writeln!(self.output, "  Correct! {} = {}", challenge.kanji, challenge.meaning)?;
        } else {
            writeln!(
                self.output,
                "  Not quite. {} is read {} ({}).",
                challenge.kanji, challenge.correct_reading, challenge.meaning
            )?;
            if let Some(hint) = &challenge.hint {
                writeln!(self.output, "  Tip: {hint}")?;
            }
        }
        Ok(true)
    }

    fn play_round(
        &mut self,
        scenario: &Scenario,
        engine: &Engine<'_>,
        mut state: SessionState,
    ) -> Result<RoundOutcome> {
        writeln!(self.output, "\n========================================")?;
        writeln!(self.output, "   {} {}", scenario.name, scenario.native_name)?;
        writeln!(self.output, "========================================")?;
        writeln!(self.output, "{}", scenario.description)?;
        writeln!(self.output, "Mission: {}", scenario.mission)?;

        let required = engine.graph().required_milestones().len();
        let total_steps = engine.graph().total_steps();
        let mut rendered = self.render_since(&state, 0)?;

        loop {
            let node = match engine.current_node(&state) {
                Ok(node) => node,
                Err(err) => {
                    warn!("No current node: {err}");
                    return Ok(RoundOutcome::Finished(state.summary()));
                }
            };

            let order = self.display_order(node);
            writeln!(
                self.output,
                "\nstep {}/{}   HP {}/{}   hints {}   objectives {}/{}",
                (state.turns() + 1).min(total_steps),
                total_steps,
                state.health(),
                state.max_health(),
                state.hints(),
                state.milestones().len(),
                required
            )?;
            for (i, choice) in order.iter().enumerate() {
                self.print_line(&format!("  {}. ", i + 1), &choice.line)?;
            }
            writeln!(self.output, "  [h] hint  [e] notes  [k] kanji  [q] quit")?;

            let Some(input) = self.read_line()? else {
                return Ok(RoundOutcome::Quit);
            };

            match input.to_lowercase().as_str() {
                "" => writeln!(self.output, "(Please pick a response.)")?,
                "q" | "quit" | "exit" => return Ok(RoundOutcome::Quit),
                "h" => match engine.use_hint(&mut state) {
                    HintOutcome::Granted(text) => {
                        writeln!(self.output, "  Hint ({} left): {}", state.hints(), text)?
                    }
                    HintOutcome::Denied => writeln!(self.output, "  No hints left.")?,
                },
                "e" => self.show_education(node)?,
                "k" => {
                    if !self.kanji_quiz(node)? {
                        return Ok(RoundOutcome::Quit);
                    }
                }
                other => {
                    let Some(choice) = other
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| order.get(i))
                    else {
                        writeln!(self.output, "  Pick 1-{} or a command.", order.len())?;
                        continue;
                    };

                    let outcome = engine
                        .select_choice(&mut state, &choice.id)
                        .context("engine rejected a displayed choice")?;
                    rendered = self.render_since(&state, rendered)?;

                    if !matches!(outcome, TurnOutcome::Continue(_)) {
                        return Ok(RoundOutcome::Finished(state.summary()));
                    }
                }
            }
        }
    }

    fn show_game_over(&mut self, outcome: &RoundOutcome) -> io::Result<()> {
        writeln!(self.output, "\n========================================")?;
        writeln!(self.output, "             GAME OVER")?;
        writeln!(self.output, "========================================")?;

        match outcome {
            RoundOutcome::Finished(summary) => {
                match &summary.status {
                    Status::Cleared => writeln!(self.output, "  Result: CLEARED - mission complete!")?,
                    Status::Failed => writeln!(self.output, "  Result: FAILED - you ran out of HP.")?,
                    Status::Incomplete { missing } => writeln!(
                        self.output,
                        "  Result: ENDED - objectives missed: {}",
                        missing.join(", ")
                    )?,
                    Status::InProgress => writeln!(self.output, "  Result: interrupted")?,
                }
                writeln!(
                    self.output,
                    "  Score:  {} / {} best responses, {} HP left",
                    summary.best_responses, summary.turns, summary.health
                )?;
            }
            RoundOutcome::Quit => {
                writeln!(self.output, "  You walked away from the conversation.")?;
            }
        }

        writeln!(self.output, "========================================\n")?;
        writeln!(self.output, "  [r] Retry    [m] Menu    [q] Quit\n")
    }

    fn prompt_after_round(&mut self) -> io::Result<AfterRound> {
        loop {
            let Some(input) = self.read_line()? else {
                return Ok(AfterRound::Quit);
            };
            match input.to_lowercase().as_str() {
                "r" => return Ok(AfterRound::Restart),
                "m" => return Ok(AfterRound::Menu),
                "q" => return Ok(AfterRound::Quit),
                _ => writeln!(self.output, "  Press [r] to retry, [m] for the menu or [q] to quit.")?,
            }
        }
    }

    /// `None` when the player quits from the menu.
    fn pick_scenario<'s>(
        &mut self,
        store: &'s ContentStore,
        progress: &Progress,
    ) -> io::Result<Option<&'s Scenario>> {
        let scenarios: Vec<&Scenario> = store.scenarios().collect();
        loop {
            writeln!(self.output, "\n========================================")?;
            writeln!(self.output, "   CONVERSATION PRACTICE")?;
            writeln!(self.output, "========================================")?;
            for (i, s) in scenarios.iter().enumerate() {
                if !progress.is_unlocked(&s.id) {
                    writeln!(self.output, "  {}. {} [locked]", i + 1, s.name)?;
                    continue;
                }
                writeln!(
                    self.output,
                    "  {}. {} {} [{:?}, kanji {}/3] - {}",
                    i + 1,
                    s.name,
                    s.native_name,
                    s.difficulty,
                    s.kanji_level,
                    s.mission
                )?;
            }
            writeln!(self.output, "  [q] Quit")?;

            let Some(input) = self.read_line()? else {
                return Ok(None);
            };
            if input.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            let picked = input
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| scenarios.get(i).copied())
                .or_else(|| scenarios.iter().copied().find(|s| s.id == input));
            match picked {
                Some(s) if progress.is_unlocked(&s.id) => return Ok(Some(s)),
                Some(s) => writeln!(
                    self.output,
                    "  {} is locked. Clear the scenario before it first.",
                    s.name
                )?,
                None => writeln!(self.output, "  Unknown scenario '{input}'.")?,
            }
        }
    }

    /// Play scenarios until the player quits. With `scenario_id`, skip the
    /// menu for the first round; that scenario is playable even if the menu
    /// would show it locked.
    pub fn run(
        &mut self,
        store: &ContentStore,
        config: SessionConfig,
        scenario_id: Option<&str>,
    ) -> Result<()> {
        let mut progress = Progress::new(store);
        let mut next = match scenario_id {
            Some(id) => Some(
                store
                    .scenario(id)
                    .with_context(|| format!("cannot start scenario '{id}'"))?,
            ),
            None => self.pick_scenario(store, &progress)?,
        };

        while let Some(scenario) = next {
            let graph = match store.get_graph(&scenario.id) {
                Ok(graph) => graph,
                Err(err) => {
                    warn!("{err}");
                    writeln!(self.output, "  This scenario cannot be started.")?;
                    next = self.pick_scenario(store, &progress)?;
                    continue;
                }
            };
            let engine = Engine::new(scenario.id.clone(), graph, config);
            let mut state = engine.start();

            loop {
                let outcome = self.play_round(scenario, &engine, state)?;
                if let RoundOutcome::Finished(summary) = &outcome {
                    info!(
                        "Scenario {} finished: {:?}, {}/{} best",
                        summary.scenario_id, summary.status, summary.best_responses, summary.turns
                    );
                }
                self.show_game_over(&outcome)?;
                if let RoundOutcome::Finished(summary) = &outcome {
                    if let Some(opened) = progress.record(summary) {
                        let name = store.scenario(opened).map_or(opened, |s| s.name.as_str());
                        writeln!(self.output, "  Unlocked: {name}\n")?;
                    }
                }

                match self.prompt_after_round()? {
                    AfterRound::Restart => {
                        info!("Player chose to retry");
                        state = engine.reset();
                    }
                    AfterRound::Menu => {
                        next = self.pick_scenario(store, &progress)?;
                        break;
                    }
                    AfterRound::Quit => {
                        writeln!(self.output, "Thanks for practising!")?;
                        return Ok(());
                    }
                }
            }
        }

        writeln!(self.output, "Thanks for practising!")?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    fn render_remote(&mut self, turn: &RemoteTurn) -> io::Result<()> {
        if let Some(correction) = &turn.correction {
            let mark = if correction.was_correct { "Good" } else { "Careful" };
            writeln!(self.output, "  {mark}: {}", correction.explanation)?;
            if let Some(better) = &correction.better_expression {
                self.print_line("  Better: ", better)?;
            }
            if let Some(point) = &correction.grammar_point {
                writeln!(self.output, "  Grammar: {point}")?;
            }
        }
        let face = emotion_face(turn.emotion);
        self.print_line(&format!("\n[NPC {face}]: "), &turn.npc)?;
        if let Some(note) = &turn.kanji_note {
            writeln!(
                self.output,
                "  Kanji {} ({}) [{}] {}",
                note.kanji, note.reading, note.transliteration, note.meaning
            )?;
        }
        Ok(())
    }

    /// Free conversation where `collaborator` writes every NPC line and
    /// the response options. Ends when the collaborator marks the
    /// conversation completed or the player quits.
    pub fn run_remote<C: DialogueCollaborator + ?Sized>(
        &mut self,
        collaborator: &mut C,
        scenario: &Scenario,
    ) -> Result<()> {
        writeln!(self.output, "\n========================================")?;
        writeln!(self.output, "   {} {} (free talk)", scenario.name, scenario.native_name)?;
        writeln!(self.output, "========================================")?;
        writeln!(self.output, "Mission: {}", scenario.mission)?;

        let mut conversation = RemoteConversation::new(scenario.id.clone());
        let mut turn = conversation.open(collaborator, scenario);
        self.render_remote(&turn)?;

        while conversation.status() == ConversationStatus::Ongoing {
            let mut order: Vec<&RemoteChoice> = turn.choices.iter().collect();
            if self.shuffle {
                order.shuffle(&mut self.rng);
            }
            for (i, choice) in order.iter().enumerate() {
                self.print_line(&format!("  {}. ", i + 1), &choice.line)?;
            }
            writeln!(self.output, "  [h] hint  [q] quit")?;

            let Some(input) = self.read_line()? else {
                break;
            };
            match input.to_lowercase().as_str() {
                "q" | "quit" | "exit" => break,
                "h" => {
                    let hint = conversation.hint(collaborator, scenario);
                    let text = hint
                        .correction
                        .map(|c| c.explanation)
                        .filter(|e| !e.is_empty())
                        .unwrap_or(hint.npc.text);
                    writeln!(self.output, "  Hint: {text}")?;
                }
                other => {
                    let Some(choice) = other
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| order.get(i).copied())
                        .cloned()
                    else {
                        writeln!(self.output, "  Pick 1-{} or a command.", order.len())?;
                        continue;
                    };
                    writeln!(self.output, "\n[You]: {} ({})", choice.line.text, choice.quality)?;
                    turn = conversation.choose(collaborator, scenario, &choice);
                    self.render_remote(&turn)?;
                }
            }
        }

        info!(
            "Free talk in {} ended after {} messages",
            scenario.id,
            conversation.history().len()
        );
        if conversation.status() == ConversationStatus::Completed {
            writeln!(self.output, "\n  Conversation complete. お疲れさまでした！")?;
        }
        writeln!(self.output, "Thanks for practising!")?;
        Ok(())
    }
}
