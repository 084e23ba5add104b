use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use gset_core::{
    Forest, Generation, GenerationalSet, IdStrategy, JsonField, JsonKey, Member, Mirrored, Replica,
    SetOptions, SetRef, Stringified,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SetArgs;

/// One line of an op log.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OpLine {
    Add {
        value: Value,
        set: Option<String>,
    },
    Remove {
        value: Option<Value>,
        id: Option<Value>,
        set: Option<String>,
    },
}

impl OpLine {
    fn set(&self) -> Option<&str> {
        match self {
            OpLine::Add { set, .. } | OpLine::Remove { set, .. } => set.as_deref(),
        }
    }
}

/// Id strategies the CLI can drive: besides resolving members, they must turn
/// a raw JSON id and a subset name into an id.
pub trait CliIds: IdStrategy<Value> + Clone + 'static {
    fn id_from_json(&self, raw: &Value) -> Result<Self::Id>;
    fn id_from_name(&self, name: &str) -> Self::Id;
}

impl CliIds for JsonField {
    fn id_from_json(&self, raw: &Value) -> Result<JsonKey> {
        Ok(JsonKey::try_from(raw)?)
    }

    fn id_from_name(&self, name: &str) -> JsonKey {
        JsonKey::from(name)
    }
}

impl CliIds for Stringified<JsonField> {
    fn id_from_json(&self, raw: &Value) -> Result<String> {
        Ok(JsonKey::try_from(raw)?.to_string())
    }

    fn id_from_name(&self, name: &str) -> String {
        name.to_string()
    }
}

/// A root set plus the named subsets the op log has mentioned so far.
struct Session<S: CliIds> {
    forest: Forest<Value, S>,
    root: SetRef,
    subsets: BTreeMap<String, SetRef>,
    strategy: S,
    options: SetOptions,
}

impl<S: CliIds> Session<S> {
    fn new(strategy: S, options: SetOptions) -> Self {
        let mut forest = Forest::new();
        let root = forest.insert(GenerationalSet::new(strategy.clone()).with_options(options));
        Self {
            forest,
            root,
            subsets: BTreeMap::new(),
            strategy,
            options,
        }
    }

    fn generation(&self) -> Result<Generation> {
        Ok(self.forest.get(self.root)?.generation())
    }

    fn target(&mut self, name: Option<&str>) -> Result<SetRef> {
        let Some(name) = name else {
            return Ok(self.root);
        };
        if let Some(r) = self.subsets.get(name) {
            return Ok(*r);
        }
        let set = GenerationalSet::new(self.strategy.clone())
            .with_id(self.strategy.id_from_name(name))
            .with_options(self.options);
        let r = self.forest.insert_child(self.root, set)?;
        log::debug!("created subset {name:?} as {r:?}");
        self.subsets.insert(name.to_string(), r);
        Ok(r)
    }

    fn apply(&mut self, op: OpLine) -> Result<Generation> {
        let target = self.target(op.set())?;
        let generation = match op {
            OpLine::Add { value, .. } => self.forest.add(target, value)?,
            OpLine::Remove { id: Some(raw), .. } => {
                let id = self.strategy.id_from_json(&raw)?;
                self.forest.remove_id(target, &id)?
            }
            OpLine::Remove { value: Some(value), .. } => self.forest.remove(target, &value)?,
            OpLine::Remove { .. } => bail!("remove needs a `value` or an `id`"),
        };
        Ok(generation)
    }

    fn print_metrics(&self) {
        println!("{}", self.forest.metrics().snapshot_csv());
    }
}

/// Parse a JSON-lines op log, skipping blank lines.
pub fn read_ops(path: &Path) -> Result<Vec<(usize, OpLine)>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut ops = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let op: OpLine = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not an op line", path.display(), i + 1))?;
        ops.push((i + 1, op));
    }
    Ok(ops)
}

fn options(args: &SetArgs) -> Result<SetOptions> {
    let mut options = SetOptions::from_env()?;
    if let Some(n) = args.max_removals {
        options = options.with_max_removals(n);
    }
    Ok(options)
}

fn play<S: CliIds>(session: &mut Session<S>, line: usize, op: OpLine) -> Result<Generation> {
    session
        .apply(op)
        .with_context(|| format!("line {line}: op rejected"))
}

pub fn cmd_replay(args: &SetArgs, since: Generation) -> Result<()> {
    let ops = read_ops(&args.ops)?;
    let options = options(args)?;
    let field = JsonField::new(args.id_field.clone());
    if args.stringify_ids {
        replay(Session::new(Stringified(field), options), ops, since, args.metrics)
    } else {
        replay(Session::new(field, options), ops, since, args.metrics)
    }
}

fn replay<S>(mut session: Session<S>, ops: Vec<(usize, OpLine)>, since: Generation, metrics: bool) -> Result<()>
where
    S: CliIds,
    S::Id: Serialize,
{
    for (line, op) in ops {
        play(&mut session, line, op)?;
    }
    let delta = session.forest.delta_since(session.root, since)?;
    println!("{}", serde_json::to_string(&delta)?);
    println!("generation={}", session.generation()?);
    if metrics {
        session.print_metrics();
    }
    Ok(())
}

pub fn cmd_follow(args: &SetArgs) -> Result<()> {
    let ops = read_ops(&args.ops)?;
    let options = options(args)?;
    let field = JsonField::new(args.id_field.clone());
    if args.stringify_ids {
        follow(Session::new(Stringified(field), options), ops, args.metrics)
    } else {
        follow(Session::new(field, options), ops, args.metrics)
    }
}

fn follow<S>(mut session: Session<S>, ops: Vec<(usize, OpLine)>, metrics: bool) -> Result<()>
where
    S: CliIds,
    S::Id: Serialize,
{
    let mut replica = Replica::new(session.strategy.clone());
    for (line, op) in ops {
        let before = session.generation()?;
        play(&mut session, line, op)?;
        let delta = session.forest.delta_since(session.root, before)?;
        println!("{}", serde_json::to_string(&delta)?);
        replica
            .apply(&delta)
            .with_context(|| format!("line {line}: replica rejected delta"))?;
    }

    let generation = session.generation()?;
    if replica.generation() != generation {
        bail!(
            "replica stopped at generation {}, source is at {generation}",
            replica.generation()
        );
    }
    check_mirror(&session.forest, session.root, &replica)?;
    println!("converged generation={generation}");
    if metrics {
        session.print_metrics();
    }
    Ok(())
}

/// Walk `set` and `replica` together; error on the first difference.
fn check_mirror<S: CliIds>(forest: &Forest<Value, S>, set: SetRef, replica: &Replica<Value, S>) -> Result<()> {
    let source = forest.get(set)?;
    let mut live = BTreeSet::new();
    for member in source.iter() {
        match member {
            Member::Value(v) => {
                let id = source.resolve(v)?;
                if replica.value(&id) != Some(v) {
                    bail!("{set:?}: replica disagrees on {id:?}");
                }
                live.insert(id);
            }
            Member::Nested(child) => {
                let id = forest
                    .get(*child)?
                    .id()
                    .cloned()
                    .ok_or_else(|| anyhow!("{child:?} is nested without an id"))?;
                match replica.get(&id) {
                    Some(Mirrored::Nested(sub)) => check_mirror(forest, *child, sub)?,
                    _ => bail!("{set:?}: replica is missing subset {id:?}"),
                }
                live.insert(id);
            }
        }
    }
    let mirrored: BTreeSet<S::Id> = replica.ids().cloned().collect();
    if mirrored != live {
        bail!("{set:?}: replica holds {mirrored:?}, source holds {live:?}");
    }
    Ok(())
}
