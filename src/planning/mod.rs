//! 规划层：JSON 提取、计划生成、答案合成与数据模型

pub mod extract;
pub mod planner;
pub mod synthesizer;
pub mod types;

pub use extract::{extract_json, parse_json_payload};
pub use planner::{parse_plan, PlanGenerator};
pub use synthesizer::{parse_final_answer, AnswerSynthesizer};
pub use types::{
    AggregatedOutputs, CapabilityOutput, CapabilityResult, FinalAnswer, Invocation, Plan,
    USE_TOOL_ACTION,
};
