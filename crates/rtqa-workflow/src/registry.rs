//! 检查注册表
//!
//! 检查函数标识 → 谓词工厂。工厂在编译检查计划时解析参数，参数错误在匹配前就暴露出来。

use crate::predicates;
use rtqa_core::{QaError, Result, SeriesRecord};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 单个谓词的评估结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckOutcome {
    pub passed: bool,
    /// 诊断文本，通过时为空
    pub output: String,
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            output: String::new(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
        }
    }

    /// 逐条累积诊断行，任一行存在即为失败
    pub fn from_lines(output: String) -> Self {
        Self {
            passed: output.is_empty(),
            output,
        }
    }
}

/// 检查谓词
///
/// 只读取所选序列，不做任何修改。
pub trait Predicate: fmt::Debug + Send + Sync {
    fn evaluate(&self, selected: &[&SeriesRecord]) -> CheckOutcome;
}

/// 由参数构造谓词
pub type PredicateFactory = fn(&Map<String, Value>) -> Result<Box<dyn Predicate>>;

/// 检查注册表
#[derive(Clone, Default)]
pub struct CheckRegistry {
    factories: BTreeMap<String, PredicateFactory>,
    aliases: BTreeMap<String, String>,
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("identifiers", &self.identifiers())
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl CheckRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含全部内置谓词及其旧名称
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(predicates::PRESENCE, predicates::Presence::build);
        registry.register(predicates::COUNT_COMPARE, predicates::CountCompare::build);
        registry.register(
            predicates::STRUCTURES_PRESENT,
            predicates::StructuresPresent::build,
        );
        registry.register(predicates::META_EQUALS, predicates::MetaEquals::build);
        registry.register(predicates::UNIFORM_VALUE, predicates::UniformValue::build);
        registry.register(predicates::CROSS_SERIES_LINK, predicates::CrossSeriesLink::build);

        for (alias, target) in predicates::LEGACY_ALIASES {
            registry.register_alias(alias, target);
        }
        registry
    }

    pub fn register(&mut self, identifier: &str, factory: PredicateFactory) {
        self.factories.insert(identifier.to_string(), factory);
    }

    /// 为已注册的标识添加别名
    pub fn register_alias(&mut self, alias: &str, identifier: &str) {
        self.aliases
            .insert(alias.to_string(), identifier.to_string());
    }

    /// 解析别名，得到规范标识
    pub fn resolve<'a>(&'a self, identifier: &'a str) -> &'a str {
        self.aliases
            .get(identifier)
            .map(String::as_str)
            .unwrap_or(identifier)
    }

    /// 构造谓词；未知标识或参数无效时报错
    pub fn instantiate(
        &self,
        identifier: &str,
        args: &Map<String, Value>,
    ) -> Result<Box<dyn Predicate>> {
        let canonical = self.resolve(identifier);
        let factory = self
            .factories
            .get(canonical)
            .ok_or_else(|| QaError::Check(format!("未知的检查函数: {}", identifier)))?;
        factory(args)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(self.resolve(identifier))
    }

    /// 已注册的规范标识
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

/// 将参数表解析为谓词的参数结构
pub(crate) fn parse_args<T: DeserializeOwned>(
    identifier: &str,
    args: &Map<String, Value>,
) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| QaError::Check(format!("检查 {} 的参数无效: {}", identifier, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_builtins_and_aliases_resolve_to_same_predicate() {
        let registry = CheckRegistry::with_builtins();
        assert_eq!(registry.identifiers().len(), 6);
        assert_eq!(registry.resolve("check_series_count"), "count-compare");
        assert!(registry.contains("is_series_present"));
        assert!(registry.contains("presence"));

        let series = SeriesRecord::new("1", "CT");
        let selected = vec![&series];
        let canonical = registry
            .instantiate("count-compare", &args(json!({"n": 1, "op": "eq"})))
            .unwrap();
        let legacy = registry
            .instantiate("check_series_count", &args(json!({"n": 1, "op": "eq"})))
            .unwrap();
        assert_eq!(canonical.evaluate(&selected), legacy.evaluate(&selected));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let registry = CheckRegistry::with_builtins();
        let err = registry.instantiate("does-not-exist", &Map::new()).unwrap_err();
        assert!(matches!(err, QaError::Check(_)));
    }

    #[test]
    fn test_unexpected_argument_is_error() {
        let registry = CheckRegistry::with_builtins();
        assert!(registry
            .instantiate("presence", &args(json!({"n": 1})))
            .is_err());
        assert!(registry
            .instantiate("meta-equals", &args(json!({"key": "RTPlanLabel"})))
            .is_err());
    }

    #[test]
    fn test_custom_predicate_can_be_registered() {
        #[derive(Debug)]
        struct AlwaysFails;

        impl Predicate for AlwaysFails {
            fn evaluate(&self, _selected: &[&SeriesRecord]) -> CheckOutcome {
                CheckOutcome::fail("nope")
            }
        }

        fn build(_args: &Map<String, Value>) -> Result<Box<dyn Predicate>> {
            Ok(Box::new(AlwaysFails))
        }

        let mut registry = CheckRegistry::new();
        registry.register("always-fails", build);
        let predicate = registry.instantiate("always-fails", &Map::new()).unwrap();
        assert_eq!(predicate.evaluate(&[]), CheckOutcome::fail("nope"));
    }
}
