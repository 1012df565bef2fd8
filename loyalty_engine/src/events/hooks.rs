use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    PointsAwardedEvent,
    PointsExpiredEvent,
    RewardRedeemedEvent,
    RuleEvaluationEvent,
};

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub points_awarded_producer: Vec<EventProducer<PointsAwardedEvent>>,
    pub rule_evaluation_producer: Vec<EventProducer<RuleEvaluationEvent>>,
    pub points_expired_producer: Vec<EventProducer<PointsExpiredEvent>>,
    pub reward_redeemed_producer: Vec<EventProducer<RewardRedeemedEvent>>,
}

impl EventProducers {
    pub async fn publish_points_awarded(&self, event: PointsAwardedEvent) {
        for producer in &self.points_awarded_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_rule_evaluation(&self, event: RuleEvaluationEvent) {
        for producer in &self.rule_evaluation_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_points_expired(&self, event: PointsExpiredEvent) {
        for producer in &self.points_expired_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_reward_redeemed(&self, event: RewardRedeemedEvent) {
        for producer in &self.reward_redeemed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub fn has_rule_evaluation_subscribers(&self) -> bool {
        !self.rule_evaluation_producer.is_empty()
    }
}

pub struct EventHandlers {
    pub on_points_awarded: Option<EventHandler<PointsAwardedEvent>>,
    pub on_rule_evaluated: Option<EventHandler<RuleEvaluationEvent>>,
    pub on_points_expired: Option<EventHandler<PointsExpiredEvent>>,
    pub on_reward_redeemed: Option<EventHandler<RewardRedeemedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_points_awarded = hooks.on_points_awarded.map(|f| EventHandler::new(buffer_size, f));
        let on_rule_evaluated = hooks.on_rule_evaluated.map(|f| EventHandler::new(buffer_size, f));
        let on_points_expired = hooks.on_points_expired.map(|f| EventHandler::new(buffer_size, f));
        let on_reward_redeemed = hooks.on_reward_redeemed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_points_awarded, on_rule_evaluated, on_points_expired, on_reward_redeemed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_points_awarded {
            result.points_awarded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_rule_evaluated {
            result.rule_evaluation_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_points_expired {
            result.points_expired_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_reward_redeemed {
            result.reward_redeemed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_points_awarded {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_rule_evaluated {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_points_expired {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_reward_redeemed {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_points_awarded: Option<Handler<PointsAwardedEvent>>,
    pub on_rule_evaluated: Option<Handler<RuleEvaluationEvent>>,
    pub on_points_expired: Option<Handler<PointsExpiredEvent>>,
    pub on_reward_redeemed: Option<Handler<RewardRedeemedEvent>>,
}

impl EventHooks {
    pub fn on_points_awarded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PointsAwardedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_points_awarded = Some(Arc::new(f));
        self
    }

    /// Receives a trace of every rule eligibility decision. Nothing is published unless rule tracing is enabled in
    /// the engine configuration.
    pub fn on_rule_evaluated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RuleEvaluationEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_rule_evaluated = Some(Arc::new(f));
        self
    }

    pub fn on_points_expired<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PointsExpiredEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_points_expired = Some(Arc::new(f));
        self
    }

    pub fn on_reward_redeemed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RewardRedeemedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_reward_redeemed = Some(Arc::new(f));
        self
    }
}
