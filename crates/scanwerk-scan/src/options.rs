// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device option synchronization.
//
// Options are discovered by walking descriptors from index 0 until the engine
// reports none; option 0's value must equal that count.  Setting an option
// either reloads the whole table (when the engine says dependent options
// changed) or re-fetches just that option when the engine may have adjusted
// the value.  `ScanOptions` returns a new snapshot per change, `ScanOptionsMut`
// updates itself; both delegate to the same routine.

use std::ops::Deref;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::{OptionDescriptor, OptionValue, Result, ScanwerkError, SetInfo};
use scanwerk_engine::EngineHandle;

/// One device option with its current value.
///
/// `value` is `None` for options that are inactive, not readable in
/// software, buttons, or groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOption {
    pub index: u32,
    pub descriptor: OptionDescriptor,
    pub value: Option<OptionValue>,
}

/// What to do with an option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionSetting {
    /// Let the device choose the value.
    Auto,
    Value(OptionValue),
}

impl From<OptionValue> for OptionSetting {
    fn from(value: OptionValue) -> Self {
        Self::Value(value)
    }
}

/// Positions of the well-known options, resolved by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct WellKnown {
    resolution: Option<usize>,
    preview: Option<usize>,
    tl_x: Option<usize>,
    tl_y: Option<usize>,
    br_x: Option<usize>,
    br_y: Option<usize>,
}

impl WellKnown {
    fn resolve(options: &[ScanOption]) -> Self {
        let mut known = Self::default();
        for (position, option) in options.iter().enumerate() {
            let slot = match option.descriptor.name.as_str() {
                "resolution" => &mut known.resolution,
                "preview" => &mut known.preview,
                "tl-x" => &mut known.tl_x,
                "tl-y" => &mut known.tl_y,
                "br-x" => &mut known.br_x,
                "br-y" => &mut known.br_y,
                _ => continue,
            };
            *slot = Some(position);
        }
        known
    }
}

/// A complete, index-ordered option table.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionTable {
    options: Vec<ScanOption>,
    well_known: WellKnown,
}

impl OptionTable {
    fn new(options: Vec<ScanOption>) -> Self {
        let well_known = WellKnown::resolve(&options);
        Self {
            options,
            well_known,
        }
    }

    pub fn options(&self) -> &[ScanOption] {
        &self.options
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScanOption> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&ScanOption> {
        self.options.get(index as usize)
    }

    /// First option with the given name.
    pub fn by_name(&self, name: &str) -> Option<&ScanOption> {
        self.options.iter().find(|o| o.descriptor.name == name)
    }

    /// Option 0, whose value is the number of options.
    pub fn zero(&self) -> Option<&ScanOption> {
        self.options.first()
    }

    pub fn resolution(&self) -> Option<&ScanOption> {
        self.known(self.well_known.resolution)
    }

    pub fn preview(&self) -> Option<&ScanOption> {
        self.known(self.well_known.preview)
    }

    pub fn tl_x(&self) -> Option<&ScanOption> {
        self.known(self.well_known.tl_x)
    }

    pub fn tl_y(&self) -> Option<&ScanOption> {
        self.known(self.well_known.tl_y)
    }

    pub fn br_x(&self) -> Option<&ScanOption> {
        self.known(self.well_known.br_x)
    }

    pub fn br_y(&self) -> Option<&ScanOption> {
        self.known(self.well_known.br_y)
    }

    fn known(&self, position: Option<usize>) -> Option<&ScanOption> {
        position.and_then(|p| self.options.get(p))
    }
}

impl<'a> IntoIterator for &'a OptionTable {
    type Item = &'a ScanOption;
    type IntoIter = std::slice::Iter<'a, ScanOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}

/// Walk every option descriptor and fetch the readable values.
#[instrument(skip_all)]
pub async fn discover(engine: &EngineHandle) -> Result<OptionTable> {
    let mut options = Vec::new();
    let mut declared = None;
    let mut index = 0u32;

    while let Some(descriptor) = engine.get_option_descriptor(index)? {
        let value = if descriptor.has_value() {
            engine.get_option_value(index).await?
        } else {
            None
        };
        if index == 0 {
            declared = value.as_ref().and_then(OptionValue::as_i32);
        }
        options.push(ScanOption {
            index,
            descriptor,
            value,
        });
        index += 1;
    }

    if declared != i32::try_from(index).ok() {
        warn!(?declared, found = index, "option count mismatch");
        return Err(ScanwerkError::ProtocolViolation(format!(
            "option 0 declares {} options but the engine describes {index}",
            declared.map_or_else(|| "no count of".to_string(), |n| n.to_string())
        )));
    }

    debug!(count = index, "options discovered");
    Ok(OptionTable::new(options))
}

/// How a successful set changes the table.
enum Change {
    Reloaded(OptionTable),
    Value(u32, Option<OptionValue>),
}

impl Change {
    fn apply(self, table: &mut OptionTable) -> Result<()> {
        match self {
            Self::Reloaded(reloaded) => *table = reloaded,
            Self::Value(index, value) => {
                let option = table.options.get_mut(index as usize).ok_or_else(|| {
                    ScanwerkError::ProtocolViolation(format!("option {index} is not in the table"))
                })?;
                option.value = value;
            }
        }
        Ok(())
    }
}

/// Set an option and work out the resulting change. Never touches `table`.
async fn set_option(
    engine: &EngineHandle,
    index: u32,
    setting: &OptionSetting,
) -> Result<(SetInfo, Change)> {
    let info = match setting {
        OptionSetting::Auto => engine.set_option_auto(index).await?,
        OptionSetting::Value(value) => engine.set_option_value(index, value).await?,
    };

    if info.reload_options {
        info!(index, "dependent options changed, reloading");
        return Ok((info, Change::Reloaded(discover(engine).await?)));
    }

    let value = match setting {
        // Numbers are converted to fixed point on the engine side, which may
        // round them without flagging the result as inexact.
        OptionSetting::Value(value) if !info.inexact && !value.is_number() => Some(value.clone()),
        _ => engine.get_option_value(index).await?,
    };
    debug!(index, ?value, inexact = info.inexact, "option set");
    Ok((info, Change::Value(index, value)))
}

/// Option table that is never modified; every change yields a new snapshot.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    engine: EngineHandle,
    table: OptionTable,
}

impl ScanOptions {
    /// Discover the options of the open device.
    pub async fn load(engine: EngineHandle) -> Result<Self> {
        let table = discover(&engine).await?;
        Ok(Self { engine, table })
    }

    pub fn table(&self) -> &OptionTable {
        &self.table
    }

    /// Apply `setting` to option `index` and return the updated snapshot.
    /// `self` is left as it was, also on failure.
    pub async fn set(
        &self,
        index: u32,
        setting: impl Into<OptionSetting>,
    ) -> Result<(SetInfo, ScanOptions)> {
        let (info, change) = set_option(&self.engine, index, &setting.into()).await?;
        let mut table = self.table.clone();
        change.apply(&mut table)?;
        Ok((
            info,
            ScanOptions {
                engine: self.engine.clone(),
                table,
            },
        ))
    }

    pub async fn set_auto(&self, index: u32) -> Result<(SetInfo, ScanOptions)> {
        self.set(index, OptionSetting::Auto).await
    }
}

impl Deref for ScanOptions {
    type Target = OptionTable;

    fn deref(&self) -> &OptionTable {
        &self.table
    }
}

/// Option table updated in place by every successful change.
#[derive(Debug, Clone)]
pub struct ScanOptionsMut {
    engine: EngineHandle,
    table: OptionTable,
}

impl ScanOptionsMut {
    pub async fn load(engine: EngineHandle) -> Result<Self> {
        let table = discover(&engine).await?;
        Ok(Self { engine, table })
    }

    pub fn table(&self) -> &OptionTable {
        &self.table
    }

    /// Apply `setting` to option `index`. On failure the table is unchanged.
    pub async fn set(&mut self, index: u32, setting: impl Into<OptionSetting>) -> Result<SetInfo> {
        let (info, change) = set_option(&self.engine, index, &setting.into()).await?;
        change.apply(&mut self.table)?;
        Ok(info)
    }

    pub async fn set_auto(&mut self, index: u32) -> Result<SetInfo> {
        self.set(index, OptionSetting::Auto).await
    }

    /// Rediscover every option.
    pub async fn reload(&mut self) -> Result<()> {
        self.table = discover(&self.engine).await?;
        Ok(())
    }
}

impl Deref for ScanOptionsMut {
    type Target = OptionTable;

    fn deref(&self) -> &OptionTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::{Operation, Status};
    use scanwerk_engine::TestEngine;

    const MODE: u32 = 1;
    const RESOLUTION: u32 = 3;
    const PREVIEW: u32 = 4;
    const TL_X: u32 = 5;
    const THRESHOLD: u32 = 9;

    async fn open(engine: TestEngine) -> EngineHandle {
        let handle = EngineHandle::new(engine);
        handle.init().expect("init");
        handle.open("test:0").await.expect("open");
        handle
    }

    /// Indices whose entries differ between two tables of equal length.
    fn changed(a: &OptionTable, b: &OptionTable) -> Vec<u32> {
        a.iter()
            .zip(b.iter())
            .filter(|(x, y)| x != y)
            .map(|(x, _)| x.index)
            .collect()
    }

    #[tokio::test]
    async fn discovery_reads_every_readable_option() {
        let options = ScanOptions::load(open(TestEngine::new()).await)
            .await
            .expect("discover");

        assert_eq!(options.len(), 13);
        assert_eq!(
            options.zero().and_then(|o| o.value.clone()),
            Some(OptionValue::Int(13))
        );
        assert_eq!(
            options.resolution().and_then(|o| o.value.clone()),
            Some(OptionValue::Int(150))
        );
        assert_eq!(options.preview().map(|o| o.index), Some(PREVIEW));
        assert_eq!(options.br_y().map(|o| o.descriptor.name.as_str()), Some("br-y"));
        for name in ["threshold", "geometry-group", "calibrate", "lamp-switch"] {
            let option = options.by_name(name).expect(name);
            assert_eq!(option.value, None, "{name} carries no value");
        }
        assert!(options.iter().enumerate().all(|(i, o)| o.index as usize == i));
    }

    #[tokio::test]
    async fn option_count_mismatch_is_a_protocol_violation() {
        let engine = TestEngine::new().with_declared_option_count(12);
        let err = discover(&open(engine).await).await.expect_err("mismatch");
        assert!(matches!(err, ScanwerkError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn rediscovery_yields_the_same_table() {
        let handle = open(TestEngine::new()).await;
        let first = discover(&handle).await.expect("first");
        let second = discover(&handle).await.expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn snapshot_set_leaves_original_untouched() {
        let options = ScanOptions::load(open(TestEngine::new()).await)
            .await
            .expect("discover");

        let (info, updated) = options
            .set(RESOLUTION, OptionValue::Int(310))
            .await
            .expect("set");
        assert!(info.inexact);
        assert_eq!(
            updated.resolution().and_then(|o| o.value.clone()),
            Some(OptionValue::Int(300))
        );
        assert_eq!(
            options.resolution().and_then(|o| o.value.clone()),
            Some(OptionValue::Int(150))
        );
        assert_eq!(changed(&options, &updated), vec![RESOLUTION]);
    }

    #[tokio::test]
    async fn fixed_point_values_are_refetched_even_when_exact() {
        let mut options = ScanOptionsMut::load(open(TestEngine::new()).await)
            .await
            .expect("discover");
        let before = options.table().clone();

        let info = options
            .set(TL_X, OptionValue::Fixed(10.123456789))
            .await
            .expect("set");
        assert!(!info.inexact);
        let stored = options.tl_x().and_then(|o| o.value.as_ref()?.as_f64());
        let stored = stored.expect("tl-x value");
        assert_ne!(stored, 10.123456789);
        assert!((stored - 10.123456789).abs() < 1e-4);
        assert_eq!(changed(&before, options.table()), vec![TL_X]);
    }

    #[tokio::test]
    async fn dependent_change_reloads_everything() {
        let mut options = ScanOptionsMut::load(open(TestEngine::new()).await)
            .await
            .expect("discover");
        assert_eq!(options.get(THRESHOLD).and_then(|o| o.value.clone()), None);

        let info = options
            .set(MODE, OptionValue::String("Lineart".into()))
            .await
            .expect("set mode");
        assert!(info.reload_options);
        assert_eq!(
            options.get(MODE).and_then(|o| o.value.clone()),
            Some(OptionValue::String("Lineart".into()))
        );
        assert_eq!(
            options.get(THRESHOLD).and_then(|o| o.value.clone()),
            Some(OptionValue::Fixed(50.0))
        );
    }

    #[tokio::test]
    async fn auto_mode_refetches_the_device_choice() {
        let mut options = ScanOptionsMut::load(open(TestEngine::new()).await)
            .await
            .expect("discover");
        options
            .set(RESOLUTION, OptionValue::Int(600))
            .await
            .expect("set");
        options.set_auto(RESOLUTION).await.expect("auto");
        assert_eq!(
            options.resolution().and_then(|o| o.value.clone()),
            Some(OptionValue::Int(150))
        );
    }

    #[tokio::test]
    async fn rejected_set_changes_nothing() {
        let mut options = ScanOptionsMut::load(open(TestEngine::new()).await)
            .await
            .expect("discover");
        let before = options.table().clone();

        let err = options
            .set(PREVIEW, OptionValue::Int(1))
            .await
            .expect_err("wrong type");
        assert_eq!(
            err,
            ScanwerkError::status(Operation::SetOptionValue, Status::Inval)
        );
        assert_eq!(options.table(), &before);

        let err = options.set_auto(PREVIEW).await.expect_err("not automatic");
        assert_eq!(
            err,
            ScanwerkError::status(Operation::SetOptionAuto, Status::Inval)
        );
    }

    #[tokio::test]
    async fn booleans_are_stored_without_refetch() {
        let test_engine = std::sync::Arc::new(TestEngine::new());
        let handle = EngineHandle::from_arc(test_engine.clone());
        handle.init().expect("init");
        handle.open("test:0").await.expect("open");
        let options = ScanOptions::load(handle).await.expect("discover");
        let reads = test_engine.call_count(Operation::GetOptionValue);

        let (_, updated) = options
            .set(PREVIEW, OptionValue::Bool(true))
            .await
            .expect("set");
        assert_eq!(
            updated.preview().and_then(|o| o.value.clone()),
            Some(OptionValue::Bool(true))
        );
        assert_eq!(test_engine.call_count(Operation::GetOptionValue), reads);
    }
}
