use anyhow::Result;
use colored::Colorize;
use relicforge_engine::Rarity;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use crate::sim::{MergeScenario, MergeSummary, RarityRow, SessionPolicy, SessionSummary};

/// One finished simulation, ready to render.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Rarity {
        seed: u64,
        rows: Vec<RarityRow>,
    },
    Merge {
        seed: u64,
        scenario: MergeScenario,
        summary: MergeSummary,
    },
    Session {
        seed: u64,
        policy: SessionPolicy,
        summary: SessionSummary,
    },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    generated_at: String,
    report: &'a Report,
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

pub fn generate_json_report<W: Write + ?Sized>(out: &mut W, report: &Report) -> Result<()> {
    let envelope = Envelope {
        generated_at: chrono::Utc::now().to_rfc3339(),
        report,
    };
    let json_output = serde_json::to_string_pretty(&envelope)?;
    writeln!(out, "{json_output}")?;
    Ok(())
}

pub fn generate_console_report<W: Write + ?Sized>(
    out: &mut W,
    report: &Report,
    duration: Duration,
) -> Result<()> {
    writeln!(out)?;
    match report {
        Report::Rarity { seed, rows } => {
            writeln!(out, "{}", "📊 Rarity Window Sweep".bright_cyan().bold())?;
            writeln!(out, "{}", "=====================".cyan())?;
            writeln!(out, "Seed: {seed}")?;
            let header: Vec<String> = Rarity::ORDINARY
                .iter()
                .map(|r| format!("{:>10}", r.key()))
                .collect();
            writeln!(out, "{:>8} {:>7} {} {:>9}", "minutes", "luck", header.join(""), "E[tier]")?;
            for row in rows {
                let cells: Vec<String> = row
                    .distribution
                    .iter()
                    .map(|p| format!("{:>10}", pct(*p)))
                    .collect();
                writeln!(
                    out,
                    "{:>8.1} {:>7.1} {} {:>9.3}",
                    row.minutes,
                    row.luck_pct,
                    cells.join(""),
                    row.expected_tier
                )?;
            }
        }
        Report::Merge {
            seed,
            scenario,
            summary,
        } => {
            writeln!(out, "{}", "🔨 Merge Monte-Carlo".bright_cyan().bold())?;
            writeln!(out, "{}", "===================".cyan())?;
            writeln!(
                out,
                "Seed: {seed} | {} x {} | boost: {}",
                scenario.inputs, scenario.rarity, scenario.boost
            )?;
            writeln!(out, "Trials: {}", summary.trials)?;
            writeln!(
                out,
                "Successes: {} ({} observed, {} expected)",
                summary.successes.to_string().green(),
                pct(summary.success_rate),
                pct(summary.mean_probability)
            )?;
            writeln!(out, "Near misses: {}", summary.near_misses.to_string().yellow())?;
            writeln!(out, "Rerolls: {}", summary.rerolls)?;
            writeln!(out, "Materials per merge: {:.3}", summary.mean_materials)?;
            writeln!(out, "Tier jumps:")?;
            for (tiers, count) in &summary.tier_jumps {
                writeln!(out, "   +{tiers}: {count}")?;
            }
        }
        Report::Session {
            seed,
            policy,
            summary,
        } => {
            writeln!(out, "{}", "🗓️  Session Simulation".bright_cyan().bold())?;
            writeln!(out, "{}", "=====================".cyan())?;
            writeln!(
                out,
                "Seed: {seed} | {} sessions of {}-{} min",
                policy.sessions, policy.min_minutes, policy.max_minutes
            )?;
            writeln!(out, "Minutes focused: {}", summary.minutes_focused)?;
            writeln!(out, "Drops:")?;
            for (rarity, count) in &summary.drops {
                writeln!(out, "   {rarity:>10}: {count}")?;
            }
            writeln!(
                out,
                "Merges: {} ({} succeeded, {} near misses, {} retried)",
                summary.merges,
                summary.merge_successes.to_string().green(),
                summary.near_misses.to_string().yellow(),
                summary.retries
            )?;
            writeln!(
                out,
                "Celestial forge: {} attempts, {} celestials",
                summary.forge_attempts, summary.celestials
            )?;
            writeln!(
                out,
                "Wallet: {} coins, {} materials",
                summary.coins, summary.materials
            )?;
            writeln!(out, "Legendaries obtained: {}", summary.legendaries_obtained)?;
            writeln!(out, "Power: {}", summary.power_total.to_string().bold())?;
        }
    }
    writeln!(out)?;
    writeln!(out, "⏱️  Simulated in {duration:?}")?;
    Ok(())
}

pub fn generate_markdown_report<W: Write + ?Sized>(out: &mut W, report: &Report) -> Result<()> {
    match report {
        Report::Rarity { seed, rows } => {
            writeln!(out, "# Relicforge Rarity Sweep\n")?;
            writeln!(out, "- **Seed**: {seed}\n")?;
            let header: Vec<&str> = Rarity::ORDINARY.iter().map(|r| r.key()).collect();
            writeln!(out, "| minutes | luck | {} | E[tier] |", header.join(" | "))?;
            writeln!(out, "|{}", "---|".repeat(header.len() + 3))?;
            for row in rows {
                let cells: Vec<String> = row.distribution.iter().map(|p| pct(*p)).collect();
                writeln!(
                    out,
                    "| {:.1} | {:.1} | {} | {:.3} |",
                    row.minutes,
                    row.luck_pct,
                    cells.join(" | "),
                    row.expected_tier
                )?;
            }
        }
        Report::Merge {
            seed,
            scenario,
            summary,
        } => {
            writeln!(out, "# Relicforge Merge Results\n")?;
            writeln!(out, "## Scenario\n")?;
            writeln!(out, "- **Seed**: {seed}")?;
            writeln!(out, "- **Inputs**: {} x {}", scenario.inputs, scenario.rarity)?;
            writeln!(out, "- **Boost**: {}", scenario.boost)?;
            writeln!(out, "- **Trials**: {}\n", summary.trials)?;
            writeln!(out, "## Summary\n")?;
            writeln!(out, "- **Success rate**: {}", pct(summary.success_rate))?;
            writeln!(out, "- **Expected rate**: {}", pct(summary.mean_probability))?;
            writeln!(out, "- **Near misses**: {}", summary.near_misses)?;
            writeln!(out, "- **Rerolls**: {}", summary.rerolls)?;
            writeln!(out, "- **Materials per merge**: {:.3}\n", summary.mean_materials)?;
            writeln!(out, "## Tier Jumps\n")?;
            for (tiers, count) in &summary.tier_jumps {
                writeln!(out, "- +{tiers}: {count}")?;
            }
        }
        Report::Session {
            seed,
            policy,
            summary,
        } => {
            writeln!(out, "# Relicforge Session Simulation\n")?;
            writeln!(out, "- **Seed**: {seed}")?;
            writeln!(out, "- **Sessions**: {}", policy.sessions)?;
            writeln!(out, "- **Minutes focused**: {}", summary.minutes_focused)?;
            writeln!(
                out,
                "- **Merges**: {} ({} succeeded)",
                summary.merges, summary.merge_successes
            )?;
            writeln!(
                out,
                "- **Near misses**: {} ({} retried)",
                summary.near_misses, summary.retries
            )?;
            writeln!(
                out,
                "- **Celestials forged**: {}/{}",
                summary.celestials, summary.forge_attempts
            )?;
            writeln!(out, "- **Power**: {}\n", summary.power_total)?;
            writeln!(out, "## Inventory\n")?;
            for (rarity, count) in &summary.inventory {
                writeln!(out, "- {rarity}: {count}")?;
            }
        }
    }
    Ok(())
}
