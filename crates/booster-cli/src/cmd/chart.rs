use std::path::Path;

use anyhow::Context;
use booster_core::chart::{ChartQuery, ChartSeries, ChartStore};
use booster_core::config::Config;
use booster_core::types::SkillId;
use chrono::{DateTime, Utc};

use crate::output::{print_json, print_table};

pub fn run(
    config_path: &Path,
    skill_id: SkillId,
    limit: u32,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    json: bool,
) -> anyhow::Result<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            anyhow::bail!("--from {from} is after --to {to}");
        }
    }
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let store = ChartStore::open(Path::new(&config.chart.path), config.chart.max_rows)
        .with_context(|| format!("failed to open chart store at {}", config.chart.path))?;

    let samples = store.query(&ChartQuery {
        skill_id,
        from,
        to,
        limit,
    })?;

    if json {
        let batch_size = limit.min(store.max_rows());
        return print_json(&ChartSeries::new(skill_id, batch_size, &samples));
    }
    if samples.is_empty() {
        println!("No samples for skill {skill_id}.");
        return Ok(());
    }
    let rows = samples
        .iter()
        .map(|s| {
            vec![
                s.calc_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                s.cnt_online.to_string(),
                s.cnt_busy.to_string(),
                s.cnt_wait.to_string(),
                format!("{:.3}", s.power),
            ]
        })
        .collect();
    print_table(&["TIME", "ONLINE", "BUSY", "WAIT", "POWER"], rows);
    Ok(())
}
