use serde::{Deserialize, Serialize};
use validator::Validate;

/// Resume-coaching features that call the text-generation provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachFeature {
    ImproveBullet,
    TailorToJob,
    Summary,
    CoverLetter,
    InterviewPrep,
}

impl CoachFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImproveBullet => "improve_bullet",
            Self::TailorToJob => "tailor_to_job",
            Self::Summary => "summary",
            Self::CoverLetter => "cover_letter",
            Self::InterviewPrep => "interview_prep",
        }
    }

    /// System prompt framing the provider's answer for this feature
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::ImproveBullet => {
                "You are a resume coach. Rewrite the given resume bullet point so it starts \
                 with a strong action verb, quantifies impact where possible and stays under \
                 30 words. Return only the rewritten bullet."
            }
            Self::TailorToJob => {
                "You are a resume coach. Given resume content and a job description, suggest \
                 concrete edits that align the resume with the role. Do not invent experience."
            }
            Self::Summary => {
                "You are a resume coach. Write a professional summary of 3 to 4 sentences \
                 based on the candidate information provided."
            }
            Self::CoverLetter => {
                "You are a career coach. Draft a concise cover letter (under 350 words) \
                 grounded strictly in the candidate information and job description provided."
            }
            Self::InterviewPrep => {
                "You are an interview coach. Produce likely interview questions for the role \
                 described, each with a short note on what a strong answer covers."
            }
        }
    }
}

/// POST /api/v1/ai/generate
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTextRequest {
    pub feature: CoachFeature,

    #[validate(length(min = 1, max = 20000))]
    pub prompt: String,

    #[validate(length(max = 20000))]
    pub job_description: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTextData {
    pub feature: CoachFeature,
    pub content: String,
    pub model: String,
}
