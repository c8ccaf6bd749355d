use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, InputMedia, InputMediaPhoto};

use crate::core::error::AppResult;
use crate::generation::fetch::Artifact;
use crate::generation::job::{GenerationJob, JobKind};
use crate::generation::worker::{FailureNotice, Notifier};

/// Delivers generation results and failure notices over Telegram.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn file_for(job: &GenerationJob, index: usize, artifact: &Artifact) -> InputFile {
        let extension = match job.kind {
            JobKind::Video => "mp4",
            _ => "png",
        };
        InputFile::memory(artifact.bytes.clone()).file_name(format!("{}_{}.{}", job.id, index, extension))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver_artifacts(&self, recipient: i64, job: &GenerationJob, artifacts: &[Artifact]) -> AppResult<()> {
        let chat = ChatId(recipient);
        match job.kind {
            JobKind::Video => {
                for (i, artifact) in artifacts.iter().enumerate() {
                    self.bot.send_video(chat, Self::file_for(job, i, artifact)).await?;
                }
            }
            JobKind::AvatarImage | JobKind::ReferenceImage => {
                if artifacts.len() == 1 {
                    self.bot.send_photo(chat, Self::file_for(job, 0, &artifacts[0])).await?;
                } else {
                    let media: Vec<InputMedia> = artifacts
                        .iter()
                        .enumerate()
                        .map(|(i, a)| InputMedia::Photo(InputMediaPhoto::new(Self::file_for(job, i, a))))
                        .collect();
                    self.bot.send_media_group(chat, media).await?;
                }
            }
        }
        log::info!("Delivered {} artifact(s) of job {} to {}", artifacts.len(), job.id, recipient);
        Ok(())
    }

    async fn deliver_failure(&self, recipient: i64, job: &GenerationJob, notice: FailureNotice) -> AppResult<()> {
        let text = match notice {
            FailureNotice::NoActiveModel => {
                "Your avatar model is not ready yet. Train a model first, then try again."
            }
            FailureNotice::InsufficientBalance => {
                "Not enough generation units for this request. Top up your balance and try again."
            }
            FailureNotice::GenerationFailed => {
                "Generation failed on our side. Your units have been returned, please try again in a bit."
            }
        };
        self.bot.send_message(ChatId(recipient), text).await?;
        log::info!("Sent failure notice {:?} for job {} to {}", notice, job.id, recipient);
        Ok(())
    }
}
