//! Scripted stand-in for the analysis service, shared by the evaluation tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::evaluation::credentials::Credential;
use crate::evaluation::invoker::{InvokeError, StageInvoker, StageRequest};
use crate::evaluation::stages::StageKind;

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(InvokeError),
    /// Responds with the text after sleeping.
    Delayed(Duration, String),
    /// Never responds; relies on the caller's timeout.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub stage: StageKind,
    pub credential_id: String,
    pub correction: Option<String>,
    pub context: Value,
}

type Hook = Box<dyn Fn(&RecordedCall) + Send + Sync>;

#[derive(Default)]
pub struct ScriptedInvoker {
    queues: Mutex<HashMap<StageKind, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<StageKind, Reply>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stage answers with a valid fixture unless scripted otherwise.
    pub fn happy() -> Self {
        let invoker = Self::new();
        invoker.set_default(StageKind::ResumeAnalyzer, Reply::Text(fixtures::resume("Ada Lovelace", 6)));
        invoker.set_default(StageKind::JobRequirements, Reply::Text(fixtures::requirements("Backend Engineer")));
        invoker.set_default(
            StageKind::AdvancedEvaluator,
            Reply::Text(fixtures::evaluation("Ada Lovelace", 82, "QUALIFIED", false)),
        );
        invoker.set_default(StageKind::InterviewStrategist, Reply::Text(fixtures::interview()));
        invoker.set_default(
            StageKind::QualityAssurance,
            Reply::Text(fixtures::review("Ada Lovelace", 80, "QUALIFIED")),
        );
        invoker
    }

    pub fn push(&self, stage: StageKind, reply: Reply) {
        self.queues
            .lock()
            .unwrap()
            .entry(stage)
            .or_default()
            .push_back(reply);
    }

    pub fn set_default(&self, stage: StageKind, reply: Reply) {
        self.defaults.lock().unwrap().insert(stage, reply);
    }

    /// Runs `hook` synchronously as each call is recorded.
    pub fn on_call(&self, hook: impl Fn(&RecordedCall) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, stage: StageKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.stage == stage).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, stage: StageKind) -> Reply {
        if let Some(reply) = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.defaults
            .lock()
            .unwrap()
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| Reply::Fail(InvokeError::Transport(format!("no reply scripted for {stage}"))))
    }
}

#[async_trait]
impl StageInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        credential: &Credential,
        request: &StageRequest<'_>,
        _timeout: Duration,
    ) -> Result<String, InvokeError> {
        let call = RecordedCall {
            stage: request.stage,
            credential_id: credential.id.clone(),
            correction: request.correction.map(str::to_string),
            context: request.context.clone(),
        };
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }
        self.calls.lock().unwrap().push(call);
        let reply = self.next_reply(request.stage);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(error) => Err(error),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(InvokeError::Timeout)
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub mod fixtures {
    use serde_json::json;

    pub fn resume(name: &str, years: i64) -> String {
        json!({
            "candidate_name": name,
            "email": "candidate@example.com",
            "years_experience": years,
            "skills": {
                "technical": ["Python", "PostgreSQL"],
                "soft": ["Communication"]
            },
            "education": [{ "degree": "BS Computer Science", "institution": "State University" }],
            "work_history": [{ "company": "Acme", "title": "Engineer", "start": "2019" }]
        })
        .to_string()
    }

    pub fn requirements(title: &str) -> String {
        json!({
            "job_title": title,
            "seniority": "mid",
            "min_years_experience": 3,
            "must_have_skills": ["Python"],
            "nice_to_have_skills": ["Kubernetes"],
            "critical": ["Python"]
        })
        .to_string()
    }

    pub fn evaluation(name: &str, score: i64, tag: &str, overqualified: bool) -> String {
        json!({
            "candidate_name": name,
            "overall_score": score,
            "qualification_tag": tag,
            "category_scores": {
                "experience": score, "skills": score, "education": 70,
                "achievements": 65, "culture": 60
            },
            "strengths": ["Strong Python background"],
            "areas_of_concern": ["Limited cloud exposure"],
            "recommendations": "Proceed to technical interview",
            "overqualification_signal": overqualified
        })
        .to_string()
    }

    pub fn interview() -> String {
        json!({
            "strategy": "Probe depth in Python services and data modelling",
            "technical_questions": ["Design a job queue on PostgreSQL"],
            "behavioral_questions": ["Describe a production incident you owned"],
            "interview_duration": "60 minutes"
        })
        .to_string()
    }

    pub fn review(name: &str, score: i64, tag: &str) -> String {
        json!({
            "candidate_name": name,
            "overall_score": score,
            "qualification_tag": tag,
            "strengths": ["Strong Python background"],
            "areas_of_concern": ["Limited cloud exposure"],
            "recommendations": "Advance",
            "bias_flags": []
        })
        .to_string()
    }
}
