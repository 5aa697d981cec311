use std::{borrow::Cow, io};

use comms::{
    Deserialize, Serialize,
    msg::{Command, Msg},
    specs::{PlanSpec, TrainConfigSpec},
};
use tokio::io::{duplex, split};

struct Label<'a>(&'a str);

impl<'a> Serialize<'a> for Label<'_> {
    fn serialize(&'a self, _buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        Some(self.0.as_bytes())
    }
}

impl<'a> Deserialize<'a> for Label<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        let buf: &'a [u8] = buf;
        str::from_utf8(buf)
            .map(Self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[tokio::test]
async fn custom_messages_travel_the_channel() -> io::Result<()> {
    let (one, two) = duplex(128);
    let (rx, tx) = split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    tx.send(&Label("param_alice_0")).await?;

    let (rx, tx) = split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut rx_buf: Vec<u32> = Vec::new();
    let label: Label = rx.recv_into(&mut rx_buf).await?;
    assert_eq!(label.0, "param_alice_0");
    Ok(())
}

#[tokio::test]
async fn a_full_session_request_sequence_is_preserved() -> io::Result<()> {
    let (one, two) = duplex(1 << 16);
    let (_, tx) = split(one);
    let (rx, _) = split(two);
    let (_, mut tx) = comms::channel(tokio::io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, tokio::io::sink());

    let config = TrainConfigSpec {
        model_id: "mlp".into(),
        plan_id: "sgd".into(),
        param_label_prefix: "w".into(),
        learning_rate: 0.05,
        batch_size: 16,
        random_sample: false,
        max_batches: Some(10),
        dataset_key: "mnist".into(),
        rounds: 3,
        tensor_count: 1,
    };
    let plan = PlanSpec {
        id: "sgd".into(),
        body: vec![0, 1, 2, 255],
    };
    let requests = vec![
        Command::ClearObjects,
        Command::StoreTensor {
            label: "w_alice_0".into(),
            shape: vec![3],
        },
        Command::SetTrainConfig(config),
        Command::StorePlan(plan),
        Command::Fit {
            dataset_key: "mnist".into(),
            epoch: 2,
        },
    ];

    for cmd in &requests {
        tx.send(&Msg::Control(cmd.clone())).await?;
        if matches!(cmd, Command::StoreTensor { .. }) {
            tx.send(&Msg::Data(&[0.5, 1.5, -2.0])).await?;
        }
    }
    tx.send(&Msg::Err(Cow::Borrowed("plan sgd missing"))).await?;

    let mut rx_buf: Vec<f32> = Vec::new();
    for expected in requests {
        let Msg::Control(got) = rx.recv_into(&mut rx_buf).await? else {
            panic!("expected a control message");
        };
        assert_eq!(got, expected);

        if matches!(got, Command::StoreTensor { .. }) {
            let Msg::Data(values) = rx.recv_into(&mut rx_buf).await? else {
                panic!("expected tensor data");
            };
            assert_eq!(values, [0.5, 1.5, -2.0]);
        }
    }

    let Msg::Err(reason) = rx.recv_into(&mut rx_buf).await? else {
        panic!("expected an error reply");
    };
    assert_eq!(reason, "plan sgd missing");
    Ok(())
}
