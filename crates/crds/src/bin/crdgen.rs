//! Prints the Cluster and InstanceGroup CRDs as YAML

use crds::{Cluster, InstanceGroup};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Cluster::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&InstanceGroup::crd())?);
    Ok(())
}
