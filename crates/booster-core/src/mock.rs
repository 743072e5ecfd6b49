//! In-process stand-ins for the external services, used when
//! `mock_requests` is on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::dispatch::SinkPool;
use crate::error::Result;
use crate::source::{ActiveSkillSource, FeedbackSource, LeadSource, OriginationSink};
use crate::types::{Lead, SkillFeedback, SkillId};

const MOCK_SKILL: SkillId = 1;
const MOCK_ONLINE: u32 = 10;

/// Fake dispatcher: skill 1 is active except for the odd poll, operators
/// are randomly busy.
#[derive(Debug, Clone, Default)]
pub struct MockDispatcher;

#[async_trait]
impl ActiveSkillSource for MockDispatcher {
    async fn active_skills(&self) -> Result<Vec<SkillId>> {
        if rand::thread_rng().gen_ratio(1, 20) {
            Ok(Vec::new())
        } else {
            Ok(vec![MOCK_SKILL])
        }
    }
}

#[async_trait]
impl FeedbackSource for MockDispatcher {
    async fn skill_feedback(&self, _skill_id: SkillId) -> Result<SkillFeedback> {
        let mut rng = rand::thread_rng();
        let busy = rng.gen_range(0..=MOCK_ONLINE);
        let wait = if busy == MOCK_ONLINE {
            rng.gen_range(0..5)
        } else {
            0
        };
        Ok(SkillFeedback {
            all: 100,
            online: MOCK_ONLINE,
            busy,
            wait,
            ..Default::default()
        })
    }
}

/// Fake lead buffer handing out sequentially numbered leads.
#[derive(Debug, Default)]
pub struct MockLeadBuffer {
    next: AtomicU64,
}

#[async_trait]
impl LeadSource for MockLeadBuffer {
    async fn leads(&self, batch_size: u32, skill_id: SkillId) -> Result<Vec<Lead>> {
        let first = self.next.fetch_add(u64::from(batch_size), Ordering::Relaxed);
        Ok((first..first + u64::from(batch_size))
            .map(|lead_id| Lead {
                lead_id,
                skill_id,
                phone: format!("phone_{lead_id}"),
            })
            .collect())
    }
}

/// Fake origination sink that accepts every call after a short delay.
#[derive(Debug, Clone)]
pub struct MockSink {
    name: String,
    delay: Duration,
}

impl MockSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl OriginationSink for MockSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start_call(&self, _lead: &Lead) -> Result<bool> {
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }
}

/// One mock sink per configured address, so logs still name them.
pub fn mock_sink_pool(addresses: &[String]) -> Result<SinkPool> {
    let sinks = if addresses.is_empty() {
        vec![Arc::new(MockSink::new("mock")) as Arc<dyn OriginationSink>]
    } else {
        addresses
            .iter()
            .map(|address| Arc::new(MockSink::new(format!("mock:{address}"))) as Arc<dyn OriginationSink>)
            .collect()
    };
    SinkPool::new(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn details_only_report_wait_when_fully_busy() {
        let dispatcher = MockDispatcher;
        for _ in 0..200 {
            let fb = dispatcher.skill_feedback(1).await.unwrap();
            assert_eq!(fb.online, 10);
            assert!(fb.busy <= 10);
            assert!(fb.wait < 5);
            if fb.busy < 10 {
                assert_eq!(fb.wait, 0);
            }
        }
    }

    #[tokio::test]
    async fn active_list_is_skill_one_or_empty() {
        let dispatcher = MockDispatcher;
        let mut seen_active = false;
        for _ in 0..100 {
            let ids = dispatcher.active_skills().await.unwrap();
            assert!(ids.is_empty() || ids == vec![1]);
            seen_active |= !ids.is_empty();
        }
        assert!(seen_active);
    }

    #[tokio::test]
    async fn leads_are_numbered_across_batches() {
        let buffer = MockLeadBuffer::default();
        let first = buffer.leads(3, 8).await.unwrap();
        let second = buffer.leads(2, 8).await.unwrap();
        let ids: Vec<u64> = first.iter().chain(&second).map(|l| l.lead_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(second[0].phone, "phone_3");
        assert!(buffer.leads(0, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_always_accepts() {
        let sink = MockSink {
            name: "t".into(),
            delay: Duration::ZERO,
        };
        let lead = Lead {
            lead_id: 1,
            skill_id: 1,
            phone: "phone_1".into(),
        };
        assert!(sink.start_call(&lead).await.unwrap());
    }

    #[test]
    fn pool_never_empty() {
        assert_eq!(mock_sink_pool(&[]).unwrap().len(), 1);
        let addresses = vec!["a:1".to_string(), "b:2".to_string()];
        assert_eq!(mock_sink_pool(&addresses).unwrap().len(), 2);
    }
}
