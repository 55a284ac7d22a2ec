// Core Domain
// マイグレーション定義、レジャー、設定、エラーの純粋なドメインモデル

pub mod config;
pub mod error;
pub mod migration;
pub mod naming;
