//! JSON-lines scripts replayed against a headless world
//!
//! Each line names players by display name. The session keeps the
//! name-to-id roster and reports what the engine did after every line.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use soulbond_engine::{Engine, EngineConfig, HeadlessWorld, ManualClock, World};
use soulbond_types::{DamageCause, Effect, EngineEvent, JoinDecision, PlayerId, Position, RitualSite};
use tokio::sync::broadcast;
use tracing::debug;

/// One script instruction
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptLine {
    /// Connect a player, reusing a known id when given
    Join {
        name: String,
        #[serde(default)]
        id: Option<PlayerId>,
    },
    Leave {
        name: String,
    },
    Damage {
        name: String,
        amount: f32,
        #[serde(default)]
        attacker: Option<String>,
    },
    Kill {
        name: String,
    },
    Respawn {
        name: String,
    },
    Hunger {
        name: String,
        value: i32,
    },
    /// Move the player and add activity counters
    Activity {
        name: String,
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        interactions: u64,
        #[serde(default)]
        ticks: u64,
    },
    Charges {
        name: String,
        count: u32,
    },
    Offerings {
        name: String,
        count: u32,
    },
    /// Register a valid ritual site
    Site {
        dimension: String,
        x: i32,
        y: i32,
        z: i32,
    },
    Ritual {
        name: String,
        dimension: String,
        x: i32,
        y: i32,
        z: i32,
    },
    Request {
        from: String,
        to: String,
    },
    Sever {
        name: String,
    },
    Link {
        a: String,
        b: String,
    },
    Tick,
    Mercy,
    /// Move the session clock forward
    Advance {
        minutes: i64,
    },
}

/// A notice delivered while handling a line
#[derive(Debug, Clone, Serialize)]
pub struct Delivered {
    /// Recipient, or `None` for a broadcast
    pub to: Option<String>,
    pub text: String,
}

/// Everything observable about one line
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub effects: Vec<Effect>,
    pub notices: Vec<Delivered>,
}

pub struct Session {
    engine: Arc<Engine>,
    world: Arc<HeadlessWorld>,
    clock: Arc<ManualClock>,
    effects: broadcast::Receiver<Effect>,
    roster: HashMap<String, PlayerId>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        let world = Arc::new(HeadlessWorld::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Arc::new(Engine::with_clock(config, world.clone(), clock.clone()));
        world.attach(engine.dispatcher());
        let effects = engine.subscribe();
        Self {
            engine,
            world,
            clock,
            effects,
            roster: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Parse and apply one raw script line.
    pub fn apply_raw(&mut self, number: usize, raw: &str) -> Result<Report> {
        let line: ScriptLine = serde_json::from_str(raw)?;
        self.apply(number, line)
    }

    pub fn apply(&mut self, number: usize, line: ScriptLine) -> Result<Report> {
        debug!(line = number, ?line, "Applying script line");
        let reply = self.run(line)?;

        let mut effects = Vec::new();
        loop {
            match self.effects.try_recv() {
                Ok(effect) => effects.push(effect),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        let notices = self
            .world
            .messages()
            .into_iter()
            .map(|(to, notice)| Delivered {
                to: to.map(|id| self.world.display_name(&id)),
                text: notice.to_string(),
            })
            .collect();
        self.world.clear_logs();

        Ok(Report {
            line: number,
            reply,
            effects,
            notices,
        })
    }

    fn run(&mut self, line: ScriptLine) -> Result<Option<String>> {
        let world = self.world.clone();
        let reply = match line {
            ScriptLine::Join { name, id } => return Ok(self.join(name, id)),
            ScriptLine::Leave { name } => {
                let id = self.resolve(&name)?;
                world.set_online(&id, false);
                self.engine.dispatch(EngineEvent::Disconnect { player: id });
                None
            }
            ScriptLine::Damage {
                name,
                amount,
                attacker,
            } => {
                let id = self.resolve(&name)?;
                let cause = match attacker {
                    Some(attacker) => DamageCause::Player {
                        attacker: self.resolve(&attacker)?,
                    },
                    None => DamageCause::Environment,
                };
                world.deal_damage(&id, amount, cause);
                None
            }
            ScriptLine::Kill { name } => {
                let id = self.resolve(&name)?;
                world.kill(&id, DamageCause::Environment);
                None
            }
            ScriptLine::Respawn { name } => {
                world.respawn(&self.resolve(&name)?);
                None
            }
            ScriptLine::Hunger { name, value } => {
                world.set_hunger(&self.resolve(&name)?, value);
                None
            }
            ScriptLine::Activity {
                name,
                x,
                y,
                z,
                interactions,
                ticks,
            } => {
                let id = self.resolve(&name)?;
                world.record_activity(&id, Position::new(x, y, z), interactions, ticks);
                None
            }
            ScriptLine::Charges { name, count } => {
                world.give_save_charges(&self.resolve(&name)?, count);
                None
            }
            ScriptLine::Offerings { name, count } => {
                world.give_offerings(&self.resolve(&name)?, count);
                None
            }
            ScriptLine::Site { dimension, x, y, z } => {
                world.add_valid_site(RitualSite::new(dimension, x, y, z));
                None
            }
            ScriptLine::Ritual {
                name,
                dimension,
                x,
                y,
                z,
            } => {
                let id = self.resolve(&name)?;
                let reply = self
                    .engine
                    .ritual_interact(id, RitualSite::new(dimension, x, y, z));
                Some(format!("{:?}", reply))
            }
            ScriptLine::Request { from, to } => {
                let outcome = self
                    .engine
                    .request_link(self.resolve(&from)?, self.resolve(&to)?);
                Some(format!("{:?}", outcome))
            }
            ScriptLine::Sever { name } => {
                let partner = self.engine.sever(self.resolve(&name)?);
                partner.map(|p| world.display_name(&p))
            }
            ScriptLine::Link { a, b } => {
                self.engine.set_link(self.resolve(&a)?, self.resolve(&b)?);
                None
            }
            ScriptLine::Tick => {
                self.engine.dispatch(EngineEvent::Tick);
                None
            }
            ScriptLine::Mercy => {
                self.engine.run_mercy_cycle();
                None
            }
            ScriptLine::Advance { minutes } => {
                self.clock.advance(Duration::minutes(minutes));
                None
            }
        };
        Ok(reply)
    }

    fn join(&mut self, name: String, id: Option<PlayerId>) -> Option<String> {
        let id = id
            .or_else(|| self.roster.get(&name).copied())
            .or_else(|| {
                self.engine
                    .active_bans()
                    .into_iter()
                    .find(|ban| ban.display_name == name)
                    .map(|ban| ban.player_id)
            })
            .unwrap_or_else(PlayerId::generate);
        self.roster.insert(name.clone(), id);

        if self.world.player(&id).is_some() {
            self.world.set_online(&id, true);
        } else {
            self.world.insert_player(id, name.clone());
        }

        match self.engine.on_join(id, &name) {
            JoinDecision::Allowed => None,
            JoinDecision::Denied { message, .. } => {
                self.world.set_online(&id, false);
                Some(message)
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<PlayerId> {
        self.roster
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("unknown player '{}'", name))
    }
}
