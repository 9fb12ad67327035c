use serde::{Deserialize, Serialize};

use crate::model::cue_list::CueList;

pub mod cue;
pub mod cue_list;
pub mod rbac;
pub mod settings;
pub mod template;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShowModel {
    pub name: String,
    pub cue_list: CueList,
}
