//! Interface de terminal do perevod — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobBoard`] mostra a lista de jobs enquanto o
//! poller a atualiza; o [`PaymentProgress`] acompanha um pagamento.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::UserInfo;
use crate::jobs::QuotaUsage;
use crate::operation::{JobOperation, JobStatus};
use crate::payment::{PaymentReceipt, PaymentReference};
use crate::poller::{PollPhase, PollView};

// Spinner padrão; o template é fixo e válido.
fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Estilos compartilhados pelas telas.
struct Palette {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Palette {
    fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    fn status(&self, status: &JobStatus) -> String {
        match status {
            JobStatus::Completed => self.green.apply_to("✓ completed").to_string(),
            JobStatus::Failed => self.red.apply_to("✗ failed").to_string(),
            JobStatus::Queued => self.yellow.apply_to("… queued").to_string(),
            JobStatus::Processing => self.yellow.apply_to("↻ processing").to_string(),
            JobStatus::Other(s) => self.yellow.apply_to(format!("? {s}")).to_string(),
        }
    }
}

/// Uma linha da tabela de jobs.
pub fn job_line(job: &JobOperation) -> String {
    let palette = Palette::new();
    let mut line = format!("{:<12} {:<32} {}", job.id, job.label, palette.status(&job.status));
    if let Some(words) = job.progress_hint {
        line.push_str(&format!(" {}", palette.dim.apply_to(format!("{words} words"))));
    }
    if let Some(created) = job.created_at {
        line.push_str(&format!(
            " {}",
            palette.dim.apply_to(created.format("%Y-%m-%d %H:%M"))
        ));
    }
    line
}

/// Imprime a lista de jobs uma única vez.
pub fn print_jobs(jobs: &[JobOperation]) {
    if jobs.is_empty() {
        println!("  No jobs yet. Upload a PDF or EPUB to start a translation.");
        return;
    }
    for job in jobs {
        println!("  {}", job_line(job));
    }
}

/// Quadro de jobs atualizado a cada snapshot aplicado pelo poller.
pub struct JobBoard {
    // Spinner com o resumo do ciclo de polling.
    pb: ProgressBar,
    // Último snapshot impresso, para não repetir linhas.
    last: Vec<JobOperation>,
}

impl JobBoard {
    pub fn start() -> Self {
        Self {
            pb: spinner("Waiting for job status...".into()),
            last: Vec::new(),
        }
    }

    /// Imprime as linhas que mudaram e atualiza o resumo.
    pub fn render(&mut self, view: &PollView<Vec<JobOperation>>) {
        if let Some(jobs) = &view.snapshot {
            for job in jobs {
                if !self.last.contains(job) {
                    self.pb.println(format!("  {}", job_line(job)));
                }
            }
            self.last = jobs.clone();
        }
        let pending = self.last.iter().filter(|j| j.is_pending()).count();
        let mut message = match view.phase {
            PollPhase::Fetching => "Checking job status...".to_string(),
            _ => format!("{pending} job(s) in progress"),
        };
        if view.failures > 0 {
            message.push_str(&format!(" (retrying, {} failed attempt(s))", view.failures));
        }
        self.pb.set_message(message);
    }

    /// Finaliza o spinner com uma mensagem conforme a fase final.
    pub fn finish(&self, phase: PollPhase) {
        self.pb.finish_and_clear();
        let palette = Palette::new();
        match phase {
            PollPhase::Idle => println!("  {} All jobs finished", palette.green.apply_to("✓")),
            PollPhase::Stopped => println!("  {} Stopped watching", palette.dim.apply_to("■")),
            PollPhase::Expired => println!(
                "  {} Still running, check back later",
                palette.yellow.apply_to("…")
            ),
            // O chamador trata a sessão rejeitada.
            PollPhase::Unauthenticated | PollPhase::Fetching | PollPhase::Waiting => {}
        }
    }
}

/// Spinner enquanto um pagamento é reconciliado.
pub struct PaymentProgress {
    pb: ProgressBar,
}

impl PaymentProgress {
    pub fn start(reference: &PaymentReference) -> Self {
        Self {
            pb: spinner(format!(
                "Confirming {} payment {}...",
                reference.provider, reference.id
            )),
        }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Exibe o recibo com o código de ativação em destaque.
pub fn print_receipt(receipt: &PaymentReceipt) {
    let palette = Palette::new();
    println!("  {} Payment confirmed", palette.green.apply_to("✓"));
    if let Some(tier) = receipt.tier {
        println!("  Tier:       {tier} ({})", tier.name());
    }
    if let Some(words) = receipt.quota_words {
        println!("  Quota:      {words} words");
    }
    match &receipt.invite_code {
        Some(code) => {
            println!("  Invite code: {}", palette.green.apply_to(code));
            println!("  Log in with: perevod login {code}");
        }
        None => println!(
            "  {}",
            palette.yellow.apply_to("The invite code will arrive by email.")
        ),
    }
}

/// Dados do usuário e consumo da cota.
pub fn print_status(user: &UserInfo, quota: Option<QuotaUsage>) {
    let palette = Palette::new();
    if let Some(email) = &user.email {
        println!("  Logged in as {email}");
    } else {
        println!("  Logged in");
    }
    if let Some(tier) = &user.tier {
        println!("  Tier: {tier}");
    }
    if let Some(quota) = quota {
        let style = if quota.percent() >= 90.0 {
            &palette.red
        } else {
            &palette.green
        };
        println!(
            "  Quota: {} / {} words ({})",
            quota.used_words,
            quota.limit_words,
            style.apply_to(format!("{:.0}%", quota.percent()))
        );
    }
}

pub fn print_forced_logout() {
    println!(
        "  {} Your session has expired. Log in again with `perevod login`.",
        Palette::new().red.apply_to("✗")
    );
}

pub fn print_success(message: &str) {
    println!("  {} {message}", Palette::new().green.apply_to("✓"));
}

pub fn print_error(message: &str) {
    eprintln!("  {} {message}", Palette::new().red.apply_to("✗"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_line_contains_id_name_and_words() {
        console::set_colors_enabled(false);
        let mut job = JobOperation::new("j1", JobStatus::Completed, "book.pdf");
        job.progress_hint = Some(120);
        let line = job_line(&job);
        assert!(line.contains("j1"));
        assert!(line.contains("book.pdf"));
        assert!(line.contains("completed"));
        assert!(line.contains("120 words"));
    }
}
